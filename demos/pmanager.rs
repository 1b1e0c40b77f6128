//! Process manager: a thin, line-oriented REPL over the kernel library
//! (component C10). Genuinely external to the kernel engine; it never
//! spawns real processes of its own, only drives the syscalls below.

use std::io::{self, BufRead, Write};

use mlfq_kernel::kernel::Kernel;
use mlfq_kernel::proc::Pid;

fn parse_args(line: &str) -> Vec<&str> {
    line.split_whitespace().collect()
}

fn main() {
    env_logger::init();
    let mut kernel = Kernel::new();
    let init = kernel.boot_init_process("init").expect("boot_init_process");
    println!("Process manager start");

    let stdin = io::stdin();
    loop {
        print!("(PMG) : ");
        io::stdout().flush().ok();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let args = parse_args(&line);
        match args.first().copied() {
            None => continue,
            Some("list") => {
                println!("Running the list command");
                print!("{}", kernel.procdump());
            }
            Some("kill") => {
                if let Some(pid_arg) = args.get(1).and_then(|s| s.parse::<u64>().ok()) {
                    println!("Running the kill command");
                    match kernel.kill(Pid(pid_arg)) {
                        Ok(()) => println!("SUCCESS : pid {} killed", pid_arg),
                        Err(e) => println!("ERROR : pid {}: {}", pid_arg, e),
                    }
                }
            }
            Some("execute") => {
                if let (Some(path), Some(stacksize)) = (
                    args.get(1),
                    args.get(2).and_then(|s| s.parse::<usize>().ok()),
                ) {
                    println!(
                        "Running the execute command with path: {} and stacksize: {}",
                        path, stacksize
                    );
                    match kernel.fork(init) {
                        Ok(child) => {
                            if let Err(e) = kernel.exec2(child, 4096, stacksize) {
                                println!("ERROR : exec2 fail: {}", e);
                            }
                        }
                        Err(e) => println!("ERROR : fork fail: {}", e),
                    }
                }
            }
            Some("memlim") => {
                if let (Some(pid_arg), Some(limit)) = (
                    args.get(1).and_then(|s| s.parse::<u64>().ok()),
                    args.get(2).and_then(|s| s.parse::<isize>().ok()),
                ) {
                    println!(
                        "Running the memlim command with pid: {} and limit: {}",
                        pid_arg, limit
                    );
                    match kernel.setmemorylimit(Pid(pid_arg), limit) {
                        Ok(()) => println!("SUCCESS : set memory limit"),
                        Err(e) => println!("ERROR : set memory limit: {}", e),
                    }
                }
            }
            Some("exit") => {
                println!("Exiting the process manager");
                break;
            }
            Some(other) => println!("Invalid command: {}", other),
        }
    }
}
