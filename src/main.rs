use anyhow::Result;
use clap::Parser;
use rip_sim::{Network, ProtocolConfig, Startup};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

#[derive(Parser)]
#[command(name = "rip-sim", about = "RIPv1 routers on loopback sockets")]
struct Cli {
    /// One router name (R<n>) per line
    #[arg(long, default_value = "startup/startup.conf")]
    routers: PathBuf,

    /// One link (R<i>-R<j>) per line
    #[arg(long, default_value = "startup/links.conf")]
    links: PathBuf,

    /// JSON protocol configuration; built-in defaults when absent
    #[arg(long)]
    config: Option<PathBuf>,
}

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ProtocolConfig::load(path)?,
        None => ProtocolConfig::default(),
    };
    let startup = Startup::load(&cli.routers, &cli.links)?;

    let mut network = Network::from_startup(config, &startup).await?;
    network.start_all();

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    print_options();

    loop {
        let Some(option) = prompt(&mut input, "Enter option: ").await? else {
            break;
        };
        match option.as_str() {
            "1" => add_router(&mut network, &mut input).await?,
            "2" => {
                if let Some(link) = prompt(&mut input, "Enter link info: ").await? {
                    report(network.add_link(&link).await);
                }
            }
            "3" => {
                if let Some(link) = prompt(&mut input, "Enter link to delete: ").await? {
                    report(network.delete_link(&link).await);
                    show_neighbors(&network).await;
                }
            }
            "4" => {
                if let Some(name) = prompt(&mut input, "Enter router name: ").await? {
                    show_table(&network, &name).await;
                }
            }
            "5" => {
                let names: Vec<String> = network.routers().iter().map(|r| r.name().to_string()).collect();
                for name in names {
                    show_table(&network, &name).await;
                }
            }
            "6" => break,
            "?" => print_options(),
            other => println!("Unknown option {other:?}, enter ? for help"),
        }
    }

    println!("Shutting down routers, please wait...");
    network.shutdown_all().await;
    Ok(())
}

fn print_options() {
    println!("OPTIONS");
    println!("1 - Add Router");
    println!("2 - Add Link");
    println!("3 - Delete Link");
    println!("4 - Show Routing Table");
    println!("5 - Show All Tables");
    println!("6 - Exit");
}

async fn prompt(input: &mut Input, text: &str) -> Result<Option<String>> {
    print!("{text}");
    std::io::stdout().flush()?;
    Ok(input.next_line().await?.map(|line| line.trim().to_string()))
}

async fn add_router(network: &mut Network, input: &mut Input) -> Result<()> {
    if let Some(name) = prompt(input, "Enter name of the new router: ").await? {
        match network.add_router(&name) {
            Ok(router) => report(network.start(router.name())),
            Err(e) => println!("{e}"),
        }
    }
    Ok(())
}

async fn show_table(network: &Network, name: &str) {
    match network.table(name).await {
        Ok(rows) => {
            println!("{} ROUTING TABLE", name.trim());
            for row in rows {
                println!("{row}");
            }
        }
        Err(e) => println!("{e}"),
    }
}

async fn show_neighbors(network: &Network) {
    for router in network.routers() {
        println!("{}", router.name());
        for neighbor in router.neighbors().await {
            println!("  {neighbor}");
        }
    }
}

fn report(result: rip_sim::Result<()>) {
    if let Err(e) = result {
        println!("{e}");
    }
}
