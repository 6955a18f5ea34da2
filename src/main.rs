use clap::Parser;
use dotenv::dotenv;
use sieve_kit::{Client, ManageSieveError};

#[derive(Parser)]
#[command(name = "sieve-kit")]
#[command(about = "A ManageSieve client for managing Sieve scripts")]
#[command(
    long_about = "A ManageSieve client for managing Sieve scripts.\n\nCredentials can be provided via command line arguments or environment variables.\nEnvironment variables can be loaded from a .env file."
)]
#[command(version)]
struct Args {
    /// ManageSieve server hostname (or set SIEVE_HOST)
    #[arg(long, env = "SIEVE_HOST")]
    host: String,

    /// Username for authentication (or set SIEVE_USERNAME)
    #[arg(short, long, env = "SIEVE_USERNAME")]
    username: String,

    /// Password for authentication (or set SIEVE_PASSWORD)
    #[arg(short, long, env = "SIEVE_PASSWORD")]
    password: String,

    /// Server port (default: 4190, or set SIEVE_PORT)
    #[arg(long, default_value_t = 4190, env = "SIEVE_PORT")]
    port: u16,

    /// Upgrade the connection with STARTTLS before authenticating
    #[arg(long)]
    starttls: bool,

    /// Authentication mechanism (DIGEST-MD5, PLAIN, LOGIN, OAUTHBEARER)
    #[arg(long)]
    mechanism: Option<String>,

    /// Download and print this script after connecting
    #[arg(long)]
    show: Option<String>,
}

async fn run(args: Args) -> Result<(), ManageSieveError> {
    let mut client = Client::new(&args.host, args.port);

    println!("Connecting to {}:{} as {}", args.host, args.port, args.username);
    client.connect().await?;

    if args.starttls || client.has_tls_support() {
        client.starttls().await?;
    }

    if !client
        .authenticate(&args.username, &args.password, "", args.mechanism.as_deref())
        .await?
    {
        eprintln!(
            "Authentication failed: {}",
            client.errmsg().unwrap_or("server rejected credentials")
        );
        std::process::exit(1);
    }
    println!("Authentication successful");

    let caps = client.capabilities();
    println!("\nServer capabilities:");
    if let Some(implementation) = &caps.implementation {
        println!("  Implementation: {implementation}");
    }
    if let Some(version) = &caps.version {
        println!("  Version: {version}");
    }
    if !caps.sasl.is_empty() {
        println!("  SASL mechanisms: {}", caps.sasl.join(", "));
    }
    let extensions = caps.sieve_extensions();
    if !extensions.is_empty() {
        println!("  Sieve extensions: {}", extensions.join(", "));
    }
    if let Some(language) = &caps.language {
        println!("  Language: {language}");
    }

    match client.listscripts().await? {
        Some((active, scripts)) => {
            println!("\nScripts:");
            if let Some(active) = &active {
                println!("  {active} (active)");
            }
            for script in &scripts {
                println!("  {script}");
            }
            if active.is_none() && scripts.is_empty() {
                println!("  (none)");
            }
        }
        None => eprintln!(
            "Listing scripts failed: {}",
            client.errmsg().unwrap_or("unknown error")
        ),
    }

    if let Some(name) = &args.show {
        match client.getscript(name).await? {
            Some(content) => {
                println!("\n# {name}");
                println!("{content}");
            }
            None => eprintln!(
                "Fetching {name} failed: {}",
                client.errmsg().unwrap_or("unknown error")
            ),
        }
    }

    client.logout().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let _ = dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
