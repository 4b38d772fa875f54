//! # CLI - crawl log shell
//!
//! A REPL over a pool of crawl writers. Reads commands from stdin, runs them
//! against the pool, and prints results to stdout. Logs go to stderr, so
//! piping commands in and reading stdout works for scripted testing.
//!
//! ## Commands
//!
//! ```text
//! WRITE uri body...        Write one record (body becomes the response)
//! LOAD threads records     Concurrent producers, each writing `records` records
//! ROTATE                   Close the current file of a pooled writer, open the next
//! LS                       List output files with size and open/final state
//! DUMP file                Print every record of an output file
//! STATS                    Pool counters
//! EXIT / QUIT              Finalize all files and quit
//! ```
//!
//! ## Configuration
//!
//! Every `CRAWLLOG_*` variable understood by [`config::Config::from_env`]
//! applies. The shell fills in three fallbacks:
//!
//! ```text
//! CRAWLLOG_PREFIX     (default: "CRAWL")
//! CRAWLLOG_MAX_SIZE   (default: 63 MiB)
//! CRAWLLOG_ENDPOINT   (default: "file://data")
//! RUST_LOG            (default: "info")
//! ```
//!
//! ## Example
//!
//! ```text
//! $ CRAWLLOG_MAX_SIZE=4096 cargo run -p cli
//! crawl log shell started (root=data, output=/crawl, prefix=CRAWL, ...)
//! > WRITE http://example.com/ hello
//! OK (writer=0, file=/crawl/CRAWL-20240101000000-00000.seq.open, pos=123)
//! > EXIT
//! bye
//! ```

mod shell;

use anyhow::Result;
use config::Config;
use shell::{Outcome, Shell};
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let config = Config::from_env()?;
    let endpoint_set = std::env::var_os("CRAWLLOG_ENDPOINT").is_some();
    let shell = Shell::from_config(config, endpoint_set)?;

    println!("{}", shell.banner());
    println!("Commands: WRITE uri body... | LOAD threads records | ROTATE");
    println!("          LS | DUMP file | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    let mut exited = false;

    for line in stdin.lock().lines() {
        let line = line?;
        match shell.execute(&line) {
            Outcome::Print(out) => {
                if !out.is_empty() {
                    println!("{}", out);
                }
            }
            Outcome::Exit(out) => {
                println!("{}", out);
                exited = true;
                break;
            }
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    // EOF without EXIT still finalizes open files.
    if !exited {
        shell.execute("EXIT");
    }
    Ok(())
}
