use std::io::{self, BufRead, Write};
use std::process::exit;

use rschat::vm::ChatError;

// Exit codes follow the interpreter's conventions: 65 for a compile error,
// 70 for a runtime error, 77 for an unreadable file, 11 for bad usage.
fn run_file(path: &str) -> ! {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("could not read the file \"{}\": {}", path, err);
            exit(77);
        }
    };
    match rschat::interpret(&source) {
        Ok(()) => exit(0),
        Err(ChatError::SyntaxError) => exit(65),
        Err(_) => exit(70),
    }
}

fn repl() -> io::Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        io::stdout().flush()?;
        match lines.next() {
            Some(line) => {
                // errors were already reported on stderr; the prompt continues
                let _ = rschat::interpret(&line?);
            }
            None => {
                println!();
                return Ok(());
            }
        }
    }
}

fn main() -> io::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    match args.len() {
        1 => repl(),
        2 => run_file(&args[1]),
        _ => {
            eprintln!("usage: rschat [path]");
            exit(11);
        }
    }
}
