//! Interactive terminal chat about one watch photo.
//!
//! Usage: watch-chat <image.jpg> [--brand <brand> --price <price>]
//!
//! With both overrides the prediction service is not contacted.

use anyhow::{Context, Result, bail};
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use watch_concierge::config::Config;
use watch_concierge::models::{ConversationTurn, WatchContext};
use watch_concierge::service::ConciergeService;

struct Args {
    image: String,
    brand: Option<String>,
    price: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut image = None;
    let mut brand = None;
    let mut price = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--brand" => brand = Some(args.next().context("--brand needs a value")?),
            "--price" => price = Some(args.next().context("--price needs a value")?),
            other if image.is_none() => image = Some(other.to_string()),
            other => bail!("unexpected argument: {other}"),
        }
    }
    Ok(Args {
        image: image.context("usage: watch-chat <image.jpg> [--brand B --price P]")?,
        brand,
        price,
    })
}

fn print_turn(turn: &ConversationTurn) {
    println!("{} {}", "User:".bold(), turn.question);
    if let Some(sql) = &turn.sql_query {
        println!("{} `{}`", "Generated SQL Query:".cyan(), sql);
    }
    if let Some(result) = &turn.query_result {
        println!("{} {}", "Query Result:".yellow(), result);
    }
    println!("{} {}", "AI:".green().bold(), turn.response);
    println!("---");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    let image = tokio::fs::read(&args.image)
        .await
        .with_context(|| format!("failed to read {}", args.image))?;

    let config = Config::load();
    let service = ConciergeService::from_config(&config).await?;

    let session_id = match (args.brand, args.price) {
        (Some(brand), Some(price)) => {
            service
                .open_session(WatchContext::new(brand, price, image))
                .await
        }
        _ => {
            let file_name = std::path::Path::new(&args.image)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("watch.jpg")
                .to_string();
            let (id, prediction) = service.start_session(image, &file_name).await?;
            println!(
                "{} {} ({:.0}% confidence)",
                "Predicted Brand:".bold(),
                prediction.predicted_class,
                prediction.confidence * 100.0
            );
            println!("{} {}", "Price:".bold(), prediction.price);
            id
        }
    };

    println!("{}", "Ask a question about this watch (empty line to quit).".dimmed());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            break;
        }

        let turn = service.ask(session_id, &line).await?;
        print_turn(&turn);
    }

    Ok(())
}
