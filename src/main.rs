use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use securelink::attack::AttackConfig;
use securelink::session::retry::RetryPolicy;
use securelink::{
    AttackMode, AttackerConfig, Controller, EncMode, Event, EventKind, KxMode, ReceiverConfig,
    RoleConfig, SecurityConfig, SenderConfig, SessionConfig,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "securelink", about = "Secure messaging demo: sender, receiver and MITM attacker")]
#[command(version)]
struct Cli {
    /// Print events as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Handshake timeout in seconds
    #[arg(long, global = true, default_value_t = 30)]
    handshake_timeout: u64,

    /// Outbound connect timeout in seconds
    #[arg(long, global = true, default_value_t = 10)]
    connect_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Listen for a single sender and print its messages
    Receiver {
        #[arg(long, default_value = "0.0.0.0")]
        bind: IpAddr,

        #[arg(short, long, default_value_t = securelink::roles::DEFAULT_PORT)]
        port: u16,

        #[command(flatten)]
        security: SecurityArgs,
    },
    /// Connect to a receiver and send each stdin line as a message
    Sender {
        #[arg(long, default_value = "127.0.0.1")]
        target: IpAddr,

        #[arg(short, long, default_value_t = securelink::roles::DEFAULT_PORT)]
        port: u16,

        /// Retry failed connects this many times
        #[arg(long, default_value_t = 0)]
        retries: u32,

        #[command(flatten)]
        security: SecurityArgs,
    },
    /// Relay between a sender and the real receiver, attacking the traffic
    Attacker {
        #[arg(long, default_value = "0.0.0.0")]
        listen: IpAddr,

        #[arg(short, long, default_value_t = securelink::roles::DEFAULT_PORT)]
        port: u16,

        #[arg(long, default_value = "127.0.0.1")]
        victim_ip: IpAddr,

        #[arg(long, default_value_t = securelink::attack::DEFAULT_VICTIM_PORT)]
        victim_port: u16,

        #[arg(long, default_value = "passive")]
        mode: AttackMode,

        /// Drop probability in percent
        #[arg(long, default_value_t = 0.0)]
        drop_rate: f64,

        #[arg(long, default_value_t = 0)]
        delay_ms: u64,

        #[arg(long, default_value = securelink::attack::DEFAULT_MODIFY_TEXT)]
        modify_text: String,

        /// Start relaying passively; enable the attack later with `start`
        #[arg(long)]
        inactive: bool,
    },
}

#[derive(Args)]
struct SecurityArgs {
    /// plaintext, aes-gcm, aes-cbc-hmac or diffie-hellman (or 0..3)
    #[arg(long, default_value = "plaintext")]
    enc: EncMode,

    /// psk, rsa or dh
    #[arg(long, default_value = "psk")]
    kx: KxMode,

    #[arg(long)]
    psk: Option<String>,

    #[arg(long)]
    demo: bool,
}

impl SecurityArgs {
    fn into_config(self) -> SecurityConfig {
        let mut builder = SecurityConfig::builder()
            .enc_mode(self.enc)
            .kx_mode(self.kx)
            .demo_mode(self.demo);
        if let Some(psk) = self.psk {
            builder = builder.psk(psk.as_str());
        }
        builder.build()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut session = SessionConfig::builder()
        .handshake_timeout(Duration::from_secs(cli.handshake_timeout))
        .connect_timeout(Duration::from_secs(cli.connect_timeout));
    if let Command::Sender { retries, .. } = &cli.command {
        if *retries > 0 {
            session = session.retry_policy(RetryPolicy {
                max_retries: *retries,
                ..Default::default()
            });
        }
    }
    let session = session.build()?;

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_events(rx, cli.json));
    let mut ctl = Controller::new(session, tx);

    let result = match cli.command {
        Command::Receiver {
            bind,
            port,
            security,
        } => {
            let config = ReceiverConfig::new(SocketAddr::new(bind, port), security.into_config());
            ctl.configure_role(RoleConfig::Receiver(config)).await?;
            run_receiver(&ctl).await
        }
        Command::Sender {
            target,
            port,
            security,
            ..
        } => {
            let config = SenderConfig::new(SocketAddr::new(target, port), security.into_config());
            ctl.configure_role(RoleConfig::Sender(config)).await?;
            run_sender(&mut ctl).await
        }
        Command::Attacker {
            listen,
            port,
            victim_ip,
            victim_port,
            mode,
            drop_rate,
            delay_ms,
            modify_text,
            inactive,
        } => {
            let attack = AttackConfig {
                mode,
                active: !inactive,
                drop_rate,
                delay_ms,
                modify_text,
                victim_ip,
                victim_port,
            };
            let config = AttackerConfig::new(SocketAddr::new(listen, port), attack);
            ctl.configure_role(RoleConfig::Attacker(config)).await?;
            run_attacker(&ctl).await
        }
    };

    ctl.stop().await;
    drop(ctl);
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
    result
}

async fn run_receiver(ctl: &Controller) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                None => {
                    // Stdin closed; keep serving until interrupted.
                    tokio::signal::ctrl_c().await?;
                    break;
                }
                Some(line) => match line.trim() {
                    "quit" => break,
                    "status" => print_status(ctl),
                    "" => {}
                    other => eprintln!("unknown command: {other} (try: status, quit)"),
                },
            },
        }
    }
    Ok(())
}

async fn run_sender(ctl: &mut Controller) -> Result<()> {
    // Failures are reported as events; lines typed later can retry.
    let _ = ctl.connect(None).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                None => break,
                Some(line) => match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/status" => print_status(ctl),
                    "/reconnect" => {
                        let _ = ctl.connect(None).await;
                    }
                    text => {
                        let _ = ctl.send_message(text).await;
                    }
                },
            },
        }
    }
    Ok(())
}

async fn run_attacker(ctl: &Controller) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                None => {
                    tokio::signal::ctrl_c().await?;
                    break;
                }
                Some(line) => {
                    let line = line.trim();
                    if line == "quit" {
                        break;
                    }
                    if let Err(e) = attack_command(ctl, line) {
                        eprintln!("{e}");
                    }
                }
            },
        }
    }
    Ok(())
}

/// `start`, `stop`, `status`, `mode <m>`, `drop <percent>`, `delay <ms>`,
/// `text <replacement>`.
fn attack_command(ctl: &Controller, line: &str) -> Result<()> {
    let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
    let arg = arg.trim();
    match command {
        "" => {}
        "start" => ctl.start_attack(None)?,
        "stop" => ctl.stop_attack()?,
        "status" => {
            print_status(ctl);
            let config = ctl.attack_config()?;
            eprintln!(
                "mode={} active={} dropRate={} delayMs={} victim={}",
                config.mode,
                config.active,
                config.drop_rate,
                config.delay_ms,
                config.victim()
            );
        }
        "mode" => {
            let mut config = ctl.attack_config()?;
            config.mode = arg.parse()?;
            ctl.update_attack_config(config)?;
        }
        "drop" => {
            let mut config = ctl.attack_config()?;
            config.drop_rate = arg.parse()?;
            ctl.update_attack_config(config)?;
        }
        "delay" => {
            let mut config = ctl.attack_config()?;
            config.delay_ms = arg.parse()?;
            ctl.update_attack_config(config)?;
        }
        "text" => {
            let mut config = ctl.attack_config()?;
            config.modify_text = arg.to_string();
            ctl.update_attack_config(config)?;
        }
        other => bail!("unknown command: {other} (try: start, stop, status, mode, drop, delay, text, quit)"),
    }
    Ok(())
}

fn print_status(ctl: &Controller) {
    let status = ctl.check_handshake();
    eprintln!("complete={} status={}", status.complete, status.status);
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<Event>, json: bool) {
    while let Some(event) = rx.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
            }
        } else {
            println!("{}", render(&event));
        }
    }
}

fn render(event: &Event) -> String {
    let detail = match &event.kind {
        EventKind::Log { message } => message.clone(),
        EventKind::Status { status } => format!("status: {status}"),
        EventKind::Error { error } => format!("error: {error}"),
        EventKind::MessageSent { text } => format!("sent: {text}"),
        EventKind::MessageReceived { text } => format!("received: {text}"),
        EventKind::ReplayRejected { seq, last } => {
            format!("replay rejected: seq {seq} (last accepted {last})")
        }
        EventKind::IntegrityFailure { message } => format!("integrity failure: {message}"),
        EventKind::AttackSuccess { message } => format!("attack succeeded: {message}"),
        EventKind::AttackFailed { message } => format!("attack failed: {message}"),
    };
    format!("[{}] {detail}", event.role)
}
