//! comp-runner: headless driver for the network compensation engine.
//!
//! Usage:
//!   comp-runner --seed 12345 --members 500 --days 120 --db run.db
//!   comp-runner --seed 12345 --members 200 --days 30 --ipc-mode

use anyhow::Result;
use chrono::NaiveDate;
use network_comp_core::{
    command::AdminCommand,
    config::CompConfig,
    engine::CompEngine,
    population::{run_population, PopulationPlan, RunSummary},
    store::NetworkStore,
    tree_view::Viewer,
    volume::VolumeEvent,
};
use std::env;
use std::io::{self, BufRead, Write};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetTree {
        viewer:  Viewer,
        root_id: String,
        depth:   Option<usize>,
    },
    TeamStats {
        member_id: String,
    },
    Leaderboard {
        bonanza_id: String,
        #[serde(default = "default_limit")]
        limit:      usize,
    },
    ApplyVolume {
        event: VolumeEvent,
    },
    RunDays {
        count: u64,
    },
    Admin {
        command: AdminCommand,
        on:      Option<NaiveDate>,
    },
    Summary,
    Quit,
}

fn default_limit() -> usize {
    10
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let members = parse_arg(&args, "--members", 200usize);
    let days = parse_arg(&args, "--days", 90u64);
    let start = parse_arg(&args, "--start", NaiveDate::from_ymd_opt(2025, 1, 1).unwrap_or(NaiveDate::MIN));
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");
    let data_dir = args
        .windows(2)
        .find(|w| w[0] == "--data-dir")
        .map(|w| w[1].as_str())
        .unwrap_or("./data");

    if !ipc_mode {
        println!("comp-runner: network compensation engine");
        println!("  seed:      {seed}");
        println!("  members:   {members}");
        println!("  days:      {days}");
        println!("  start:     {start}");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!();
    }

    // A named shared-memory URI keeps :memory: visible to
    // NetworkStore::reopen.
    let db_effective: String = if db == ":memory:" {
        format!("file:comprun_{seed}?mode=memory&cache=shared")
    } else {
        db.to_string()
    };
    let config = CompConfig::load(data_dir)?;
    let store = NetworkStore::open(&db_effective)?;
    let mut engine = CompEngine::build(config, store)?;

    let plan = PopulationPlan::new(seed, members, days, start);
    let summary = run_population(&mut engine, &plan)?;

    if ipc_mode {
        run_ipc_loop(&mut engine, start)?;
    } else {
        print_summary(&engine, &summary)?;
    }
    Ok(())
}

fn run_ipc_loop(engine: &mut CompEngine, start: NaiveDate) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                writeln!(stdout, "{}", serde_json::json!({ "error": e.to_string() }))?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        // Engine errors are answered on the wire; the loop keeps serving.
        let reply = match handle_command(engine, cmd, start) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("ipc command failed: error={e}");
                serde_json::json!({ "error": e.to_string() })
            }
        };
        writeln!(stdout, "{reply}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(engine: &mut CompEngine, cmd: IpcCommand, start: NaiveDate) -> Result<serde_json::Value> {
    let today = engine.clock.next_day(start);
    let value = match cmd {
        IpcCommand::GetTree { viewer, root_id, depth } => {
            serde_json::to_value(engine.tree_view(&viewer, &root_id, depth)?)?
        }
        IpcCommand::TeamStats { member_id } => serde_json::to_value(engine.team_stats(&member_id)?)?,
        IpcCommand::Leaderboard { bonanza_id, limit } => {
            serde_json::to_value(engine.leaderboard(&bonanza_id, limit)?)?
        }
        IpcCommand::ApplyVolume { event } => {
            let outcome = engine.apply_personal_volume(&event)?;
            serde_json::json!({ "applied": format!("{outcome:?}") })
        }
        IpcCommand::RunDays { count } => {
            engine.run_days(start, count)?;
            serde_json::json!({ "last_processed": engine.clock.last_processed })
        }
        IpcCommand::Admin { command, on } => {
            serde_json::to_value(engine.execute(command, on.unwrap_or(today))?)?
        }
        IpcCommand::Summary => serde_json::json!({
            "members": engine.store.member_count()?,
            "last_processed": engine.clock.last_processed,
            "income": engine.store.income_summary()?,
        }),
        IpcCommand::Quit => serde_json::Value::Null,
    };
    Ok(value)
}

fn print_summary(engine: &CompEngine, summary: &RunSummary) -> Result<()> {
    println!("=== RUN SUMMARY ===");
    println!("  days run:       {}", summary.days);
    if let Some(last) = summary.last_day {
        println!("  last day:       {last}");
    }
    println!("  members:        {}", engine.store.member_count()?);
    println!("  signed up:      {}", summary.members);
    println!("  lapsed:         {}", summary.lapsed);
    println!("  volume events:  {}", summary.volume_events);
    println!("  volume total:   {:.2}", summary.volume_total);

    println!();
    println!("=== INCOME SUMMARY ===");
    if summary.income_by_type.is_empty() {
        println!("  (No income booked yet)");
    } else {
        for (income_type, count, total) in &summary.income_by_type {
            println!("  {:<22} entries: {count:>6} | net: {total:>14.2}", income_type.as_str());
        }
    }

    let runs = engine.store.evaluation_runs()?;
    let failed: usize = runs.iter().map(|r| r.failed).sum();
    println!();
    println!("  evaluation runs: {} (failed rows: {failed})", runs.len());
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
