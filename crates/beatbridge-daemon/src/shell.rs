//! Interactive command shell
//!
//! Minimal line-based prompt on stdin. The daemon stays resident until
//! `quit` or end-of-input, or until the host connection is lost.

use std::io::{self, BufRead, Write};

use anyhow::Result;
use beatbridge_core::{Bridge, LoopbackHandle};

pub fn run(bridge: &Bridge, loopback: Option<&LoopbackHandle>) -> Result<()> {
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("beatbridge> ");
        io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF
            break;
        }

        let line = line.trim().to_lowercase();
        let mut parts = line.split_whitespace();
        match parts.next() {
            None => {}
            Some("quit") | Some("exit") => break,
            Some("tempo") => match parts.next() {
                None => println!("tempo: {:.2} bpm", bridge.tempo()),
                Some(arg) => match arg.parse::<f64>() {
                    Ok(bpm) if bpm > 0.0 => bridge.set_tempo(bpm),
                    _ => println!("usage: tempo [<bpm>]"),
                },
            },
            Some("start") => bridge.set_playing(true),
            Some("stop") => bridge.set_playing(false),
            Some("locate") => match parts.next().and_then(|n| n.parse().ok()) {
                Some(frame) => bridge.locate(frame),
                None => println!("usage: locate <frame>"),
            },
            Some("status") => print_status(bridge),
            // Only meaningful on the loopback timeline
            Some("peers") => match (loopback, parts.next().and_then(|n| n.parse().ok())) {
                (Some(handle), Some(n)) => handle.set_num_peers(n),
                (None, _) => println!("peers: not available on this timeline"),
                (_, None) => println!("usage: peers <count>"),
            },
            Some("help") => print_help(),
            Some(other) => println!("unknown command: {} (try 'help')", other),
        }

        if !bridge.is_active() {
            log::error!("host connection lost, shutting down");
            break;
        }
    }

    Ok(())
}

fn print_status(bridge: &Bridge) {
    println!(
        "tempo: {:.2} bpm | quantum: {:.1} | peers: {} | {} | {} Hz",
        bridge.tempo(),
        bridge.quantum(),
        bridge.num_peers(),
        if bridge.is_playing() {
            "playing"
        } else {
            "stopped"
        },
        bridge.sample_rate()
    );
}

fn print_help() {
    println!("commands:");
    println!("  tempo [<bpm>]   show or request the session tempo");
    println!("  start           start the transport");
    println!("  stop            stop the transport");
    println!("  locate <frame>  relocate the transport to a raw frame");
    println!("  status          show tempo, quantum, peers and play state");
    println!("  peers <count>   simulate session peers (loopback timeline only)");
    println!("  quit            exit");
}
