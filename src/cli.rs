use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::{
    api::router,
    orders::{Order, Side},
    state::AppState,
    store::{OrderStore, ParityStore},
    utils::shutdown_token,
};

/// CLI for the matching engine
#[derive(Parser)]
#[command(name = "matchbook")]
#[command(version = "0.1", about = "A price-time priority order matching engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP matching server
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:3000")]
        addr: String,

        /// Database directory
        #[arg(long, default_value = "matchbook-db")]
        db: PathBuf,

        /// Keep all state in memory (nothing survives the process)
        #[arg(long)]
        ephemeral: bool,
    },

    /// Display the resting book for a symbol
    Book {
        symbol: String,

        #[arg(long, default_value = "matchbook-db")]
        db: PathBuf,
    },

    /// Display trade history for a symbol
    Trades {
        symbol: String,

        #[arg(long, default_value = "matchbook-db")]
        db: PathBuf,
    },
}

fn print_order_book(orders: &[Order]) {
    let mut bids: BTreeMap<u64, u64> = BTreeMap::new();
    let mut asks: BTreeMap<u64, u64> = BTreeMap::new();
    for order in orders {
        if let Some(price) = order.price {
            let side = match order.side {
                Side::Buy => &mut bids,
                Side::Sell => &mut asks,
            };
            *side.entry(price).or_default() += order.remaining_quantity;
        }
    }

    println!("------ Order Book ------");
    println!("Bids (highest first):");
    for (price, total_qty) in bids.iter().rev() {
        println!("Price: {}, Total Qty: {}", price, total_qty);
    }

    println!("Asks (lowest first):");
    for (price, total_qty) in asks.iter() {
        println!("Price: {}, Total Qty: {}", price, total_qty);
    }
    println!("--------------------------");
}

async fn serve(addr: String, db: PathBuf, ephemeral: bool) -> anyhow::Result<()> {
    let state = if ephemeral {
        AppState::ephemeral()?
    } else {
        AppState::new(&db)?
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "matching engine listening");

    let token = shutdown_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    Ok(())
}

pub async fn run_cli() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            addr,
            db,
            ephemeral,
        } => serve(addr, db, ephemeral).await?,
        Commands::Book { symbol, db } => {
            let store = ParityStore::open(&db)?;
            print_order_book(&store.open_orders(&symbol)?);
        }
        Commands::Trades { symbol, db } => {
            let store = ParityStore::open(&db)?;
            for trade in store.trades(&symbol)? {
                println!("{:?}", trade);
            }
        }
    }
    Ok(())
}
