#![deny(warnings)]

//! Headless driver: plays a scripted game against the resolution engine and
//! prints round reports plus the final ranking. A seeded RNG generates one
//! decision per team per round, so runs are reproducible.

use anyhow::Result;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sim_core::{FirmId, GameConfig, RoundDecision, RoundReport, VerticalIntegration};
use sim_engine::{FirmStatus, Game};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

struct Args {
    teams: usize,
    seed: u64,
    no_inertia: bool,
    json: bool,
}

fn parse_args() -> Args {
    let mut args = Args {
        teams: 4,
        seed: 42,
        no_inertia: false,
        json: false,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--teams" => {
                if let Some(n) = it.next().and_then(|s| s.parse().ok()) {
                    args.teams = n;
                }
            }
            "--seed" => {
                if let Some(s) = it.next().and_then(|s| s.parse().ok()) {
                    args.seed = s;
                }
            }
            "--no-inertia" => args.no_inertia = true,
            "--json" => args.json = true,
            _ => {}
        }
    }
    args
}

fn scripted_decision(rng: &mut ChaCha8Rng) -> RoundDecision {
    RoundDecision {
        low_ratio: f64::from(rng.gen_range(0..=10)) / 10.0,
        vertical_integration: match rng.gen_range(0..4) {
            0 => Some(VerticalIntegration::Manufacturing),
            1 => Some(VerticalIntegration::Software),
            _ => None,
        },
        build_factory: rng.gen_bool(0.2),
    }
}

fn print_report(report: &RoundReport) {
    println!("=== Round {} report ===", report.round);
    println!(
        "{:<10} {:>7} {:>7} {:>7} {:>14} {:>14} {:>5} {:>16} {:>5} {:>5}",
        "Team", "Low%", "High%", "Total%", "Net Profit", "Cash", "Mult", "Est. Price", "ShR", "PrR"
    );
    for row in &report.rows {
        if row.is_bankrupt && row.total_share == 0.0 {
            println!("{:<10} {:>7}", row.id, "-- bankrupt --");
            continue;
        }
        println!(
            "{:<10} {:>6.1}% {:>6.1}% {:>6.1}% {:>14} {:>14} {:>5} {:>16} {:>5} {:>5}",
            row.id,
            row.low_share * 100.0,
            row.high_share * 100.0,
            row.total_share * 100.0,
            row.net_profit.round_dp(0),
            row.cash.round_dp(0),
            row.valuation_multiple,
            row.estimated_price.round_dp(0),
            row.share_rank,
            row.price_rank,
        );
    }
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .init();

    let args = parse_args();
    info!(teams = args.teams, seed = args.seed, "starting scripted game");

    let roster: Vec<FirmId> = (1..=args.teams)
        .map(|i| FirmId(format!("Team {i}")))
        .collect();
    let config = GameConfig {
        inertia_alpha: if args.no_inertia { None } else { Some(0.6) },
        ..GameConfig::default()
    };
    let mut game = Game::new(roster, config)?;
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);

    while !game.is_game_over() {
        for (id, status) in game.statuses() {
            if status != FirmStatus::Bankrupt {
                game.submit_decision(&id, scripted_decision(&mut rng))?;
            }
        }
        let report = game.resolve_round()?;
        print_report(&report);
    }

    println!("=== Final ranking ===");
    println!(
        "{:<6} {:<10} {:>7} {:>16} {:>8}",
        "Rank", "Team", "Share%", "Price", "Score"
    );
    for standing in game.final_ranking()? {
        println!(
            "{:<6} {:<10} {:>6.1}% {:>16} {:>8.4}",
            standing.rank,
            standing.id,
            standing.final_share * 100.0,
            standing.final_price.round_dp(2),
            standing.score,
        );
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(game.history())?);
    }
    Ok(())
}
