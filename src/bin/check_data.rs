use anyhow::Result;
use genmix_lib::{config::Settings, db};

#[tokio::main]
async fn main() -> Result<()> {
    genmix_lib::init_tracing();
    let settings = Settings::from_env();
    let url = std::env::args().nth(1).unwrap_or(settings.database_url);

    println!("Coverage in {}", url);
    let pool = db::init(&url).await?;
    let rows = db::coverage(&pool).await?;

    println!("\n{:<6} | {:<6} | {:>8} | {:<25} | {:<25}", "BA", "Market", "Points", "First", "Last");
    println!("{}", "-".repeat(82));

    if rows.is_empty() {
        println!("NO DATA");
    }
    for row in rows {
        let fmt = |t: Option<chrono::DateTime<chrono::Utc>>| t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".into());
        println!(
            "{:<6} | {:<6} | {:>8} | {:<25} | {:<25}",
            row.ba_name,
            row.market,
            row.points,
            fmt(row.first),
            fmt(row.last)
        );
    }
    Ok(())
}
