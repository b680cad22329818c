//! Run commands on a host in the foreground and in the background.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example remote_exec -- --host localhost --user deploy --key ~/.ssh/id_ed25519
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use sshwright::{ExecutionSettings, ExecutorBuilder};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG=debug shows channel lifecycle events
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut builder = ExecutorBuilder::new(&args.host)
        .port(args.port)
        .username(&args.user)
        .timeout(Duration::from_secs(10));
    if let Some(password) = &args.password {
        builder = builder.password(password);
    } else if let Some(key) = &args.key {
        builder = builder.private_key(key);
    } else {
        eprintln!("Error: Must provide either --password or --key");
        std::process::exit(1);
    }

    let executor = builder.connect().await?;

    let quiet = ExecutionSettings::default().with_logging(false);
    let kernel = executor.execute(&quiet, "uname -sr").await?;
    println!("Kernel: {kernel}");

    // Output lines are logged as they arrive; the joined result comes back at the end.
    let listing = executor.execute(&ExecutionSettings::default(), "ls -la /tmp").await?;
    println!("{} lines in /tmp listing", listing.lines().count());

    let notify = ExecutionSettings::default()
        .with_callback(|result| println!("background finished: {result}"));
    executor
        .execute_background(&notify, "sleep 2 && echo slept")
        .await?;
    executor
        .execute_background(&notify, "du -sh /var/log 2>/dev/null | tail -1")
        .await?;
    println!("{} commands running in the background", executor.background().running());

    executor.wait_for_background().await?;

    match executor.execute(&quiet, "exit 3").await {
        Ok(_) => println!("unexpected success"),
        Err(e) => println!("exit status {:?}: {e}", e.exit_status()),
    }

    Ok(())
}

struct Args {
    host: String,
    port: u16,
    user: String,
    password: Option<String>,
    key: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = Args {
            host: "localhost".to_string(),
            port: 22,
            user: env::var("USER").unwrap_or_else(|_| "root".to_string()),
            password: None,
            key: None,
        };

        let mut iter = env::args().skip(1);
        while let Some(flag) = iter.next() {
            let value = iter.next();
            match (flag.as_str(), value) {
                ("--host", Some(v)) => args.host = v,
                ("--port", Some(v)) => args.port = v.parse().unwrap_or(22),
                ("--user", Some(v)) => args.user = v,
                ("--password", Some(v)) => args.password = Some(v),
                ("--key", Some(v)) => args.key = Some(PathBuf::from(v)),
                (other, _) => eprintln!("Unknown argument: {other}"),
            }
        }
        args
    }
}
