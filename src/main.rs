use shim_seq::{Controller, SimulatedBus};
use std::io::{self, BufRead, Write};
use std::time::Duration;

// The main entry point for the sequencer console application. The controller
// runs against the simulated bus; swap in a hardware bus implementation to
// drive real boards.
fn main() {
    println!("==============================");
    println!("  Shim Waveform Sequencer     ");
    println!("==============================");

    let mut controller = Controller::new(SimulatedBus::new());

    // Main menu loop.
    loop {
        println!("\nSelect mode:");
        println!("  1. Manual Command Input");
        println!("  2. Listen on Serial Port");
        println!("  3. Exit");
        print!("> ");
        io::stdout().flush().unwrap();

        let mut choice = String::new();
        io::stdin().read_line(&mut choice).unwrap();

        match choice.trim() {
            "1" => run_manual_mode(&mut controller),
            "2" => run_serial_mode(&mut controller),
            "3" => break,
            _ => eprintln!("[ERROR] Invalid choice. Please enter 1, 2, or 3."),
        }
    }
}

// Handles the manual command input mode. Lines are fed to the controller
// byte by byte; a few console-only words inject trigger and sync events that
// would come from hardware pins on a real board.
fn run_manual_mode(controller: &mut Controller<SimulatedBus>) {
    println!("\n--- Manual Mode ---");
    println!("Enter command bytes, 'trig' / 'trig N' for trigger events,");
    println!("'sync on' / 'sync off', or 'back' to return to the main menu.");
    print!("> ");
    io::stdout().flush().unwrap();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let input = line.unwrap();
        let command = input.trim();

        match command {
            "back" => break,
            "" => {}
            "trig" => {
                controller.on_trigger();
                println!("trigger -> counter {}", controller.counter());
            }
            "sync on" => controller.set_sync_enabled(true),
            "sync off" => controller.set_sync_enabled(false),
            _ if command.starts_with("trig ") => match command[5..].trim().parse::<u32>() {
                Ok(count) => {
                    for _ in 0..count {
                        controller.on_trigger();
                    }
                    println!("{} triggers -> counter {}", count, controller.counter());
                }
                Err(_) => eprintln!("[ERROR] 'trig' takes a decimal count."),
            },
            _ => {
                // Feed the line plus a newline so multi-token commands and
                // headers see their terminator.
                for byte in command.bytes().chain(std::iter::once(b'\n')) {
                    if let Some(response) = controller.process_byte(byte) {
                        println!("< {}", response);
                    }
                }
            }
        }

        if let Some(notice) = controller.poll() {
            println!("< {}", notice);
        }
        print!("> ");
        io::stdout().flush().unwrap();
    }
}

// Handles the serial port listening mode.
fn run_serial_mode(controller: &mut Controller<SimulatedBus>) {
    println!("\n--- Serial Mode ---");

    // List available serial ports.
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            eprintln!("[ERROR] Could not enumerate serial ports: {}", e);
            return;
        }
    };

    if ports.is_empty() {
        eprintln!("[ERROR] No serial ports found.");
        return;
    }

    println!("Available serial ports:");
    for (i, port) in ports.iter().enumerate() {
        println!("  {}: {}", i, port.port_name);
    }

    // Get user's choice of serial port.
    print!("Select a port (number): ");
    io::stdout().flush().unwrap();
    let mut port_choice = String::new();
    io::stdin().read_line(&mut port_choice).unwrap();
    let port_index: usize = match port_choice.trim().parse() {
        Ok(i) if i < ports.len() => i,
        _ => {
            eprintln!("[ERROR] Invalid port selection.");
            return;
        }
    };
    let port_name = &ports[port_index].port_name;

    // Get user's choice of baud rate.
    let baud_rates = [9600, 19200, 38400, 57600, 115200];
    println!("Available baud rates:");
    for (i, &rate) in baud_rates.iter().enumerate() {
        println!("  {}: {}", i, rate);
    }
    print!("Select a baud rate (number): ");
    io::stdout().flush().unwrap();
    let mut baud_choice = String::new();
    io::stdin().read_line(&mut baud_choice).unwrap();
    let baud_index: usize = match baud_choice.trim().parse() {
        Ok(i) if i < baud_rates.len() => i,
        _ => {
            eprintln!("[ERROR] Invalid baud rate selection.");
            return;
        }
    };
    let baud_rate = baud_rates[baud_index];

    // Open the selected serial port. The short read timeout doubles as the
    // poll interval for sync-pulse and load-timeout housekeeping.
    let mut port = match serialport::new(port_name, baud_rate)
        .timeout(Duration::from_millis(10))
        .open()
    {
        Ok(port) => port,
        Err(e) => {
            eprintln!("[ERROR] Failed to open port '{}': {}", port_name, e);
            return;
        }
    };

    println!(
        "\nListening on {} at {} baud. Press Ctrl+C to exit.",
        port_name, baud_rate
    );

    let mut serial_buf: Vec<u8> = vec![0; 512];
    loop {
        match port.read(serial_buf.as_mut_slice()) {
            Ok(bytes_read) => {
                for &byte in &serial_buf[..bytes_read] {
                    if let Some(response) = controller.process_byte(byte) {
                        println!("< {}", response);
                        if let Err(e) = port.write_all(response.as_bytes()) {
                            eprintln!("[ERROR] Failed to write to serial port: {}", e);
                        }
                        if let Err(e) = port.write_all(b"\n") {
                            eprintln!("[ERROR] Failed to write to serial port: {}", e);
                        }
                    }
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => (),
            Err(e) => eprintln!("[ERROR] Serial port error: {}", e),
        }

        if let Some(notice) = controller.poll() {
            println!("< {}", notice);
            if let Err(e) = port.write_all(notice.as_bytes()) {
                eprintln!("[ERROR] Failed to write to serial port: {}", e);
            }
        }
    }
}
