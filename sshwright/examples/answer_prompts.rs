//! Drive an interactive shell with interaction rules.
//!
//! Logs in, answers a `sudo` password prompt and leaves the shell once the
//! privileged command has printed its marker.
//!
//! # Usage
//!
//! ```bash
//! SSH_PASSWORD=secret cargo run --example answer_prompts -- localhost deploy
//! ```

use std::env;

use sshwright::{ExecutionSettings, ExecutorBuilder, Matcher, RuleSet};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".to_string());
    let user = args.next().unwrap_or_else(|| "root".to_string());
    let password = env::var("SSH_PASSWORD")?;

    let executor = ExecutorBuilder::new(&host)
        .username(&user)
        .password(&password)
        .connect()
        .await?;

    // After the sudo prompt is answered only the exit rule stays active.
    let after_sudo = RuleSet::builder()
        .when(Matcher::exact("privileged-ok"))
        .reply_line("exit")
        .build();
    let rules = RuleSet::builder()
        .when(Matcher::partial(r"\$ $")?)
        .once()
        .reply_line("sudo -k; sudo -S -p '[sudo] password: ' sh -c 'echo privileged-ok'")
        .when(Matcher::partial(r"\[sudo\] password: $")?)
        .then(after_sudo)
        .reply_line(password.clone())
        .build();

    let settings = ExecutionSettings::default()
        .with_pty(true)
        .with_interaction(rules);

    executor.run_shell(&settings).await?;
    println!("shell on {} exited cleanly", executor.remote());

    Ok(())
}
