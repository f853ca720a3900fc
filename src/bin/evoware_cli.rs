use evoware::cherrypicking::{cherry_pick, CherryPick, PartIndex};
use evoware::config::WorklistConfig;
use evoware::engine::{capabilities, Engine, Operation, Workflow, WorklistEngine};
use evoware::worklist::{TracingNotifier, TransferOptions, Worklist, WorklistTarget};
use evoware::{about, PlateFormat, PlatePosition};
use serde::{Deserialize, Serialize};
use std::{env, fs};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Serialize)]
struct PlateInfo {
    wells: usize,
    columns: usize,
    rows: usize,
    first: String,
    last: String,
}

#[derive(Serialize)]
struct ConvertedPosition {
    input: String,
    position: usize,
    human: String,
    row: usize,
    column: usize,
}

#[derive(Deserialize)]
struct PickRow {
    part: String,
    #[serde(default)]
    clone: String,
    dst: String,
    position: String,
    volume: f64,
}

#[derive(Default)]
struct GlobalArgs {
    config: Option<String>,
    plate: Option<usize>,
    out: Option<String>,
}

fn usage() {
    eprintln!(
        "Usage:\n  \
  evoware_cli --version\n  \
  evoware_cli plate-info N\n  \
  evoware_cli convert N POSITION...\n  \
  evoware_cli row N POSITION\n  \
  evoware_cli column N POSITION\n  \
  evoware_cli capabilities\n  \
  evoware_cli [--config PATH] [--plate N] [--out PATH] op '<operation-json>'\n  \
  evoware_cli [--config PATH] [--plate N] [--out PATH] workflow '<workflow-json>'\n  \
  evoware_cli [--config PATH] [--plate N] [--out PATH] \
  cherry-pick PARTS.csv PICKS.csv [--by-label]\n\n  \
  Tip: pass @file.json instead of inline JSON\n  \
  Log level: EVOWARE_LOG=debug"
    );
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("EVOWARE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_json_arg(value: &str) -> Result<String, String> {
    if let Some(path) = value.strip_prefix('@') {
        fs::read_to_string(path).map_err(|e| format!("Could not read JSON file '{path}': {e}"))
    } else {
        Ok(value.to_string())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Could not serialize JSON output: {e}"))?;
    println!("{text}");
    Ok(())
}

fn parse_usize(value: &str, what: &str) -> Result<usize, String> {
    value
        .parse::<usize>()
        .map_err(|_| format!("Invalid {what} '{value}'"))
}

fn parse_global_args(args: &[String]) -> Result<(GlobalArgs, usize), String> {
    let mut globals = GlobalArgs::default();
    let mut idx = 1;
    while idx < args.len() {
        let flag = args[idx].as_str();
        if !matches!(flag, "--config" | "--plate" | "--out") {
            break;
        }
        let value = args
            .get(idx + 1)
            .ok_or_else(|| format!("Missing value for {flag}"))?;
        match flag {
            "--config" => globals.config = Some(value.clone()),
            "--plate" => globals.plate = Some(parse_usize(value, "plate format")?),
            _ => globals.out = Some(value.clone()),
        }
        idx += 2;
    }
    Ok((globals, idx))
}

fn plate_arg(args: &[String], idx: usize) -> Result<PlateFormat, String> {
    let n = args.get(idx).ok_or("Missing number of wells")?;
    PlateFormat::new(parse_usize(n, "number of wells")?).map_err(|e| e.to_string())
}

fn open_worklist(globals: &GlobalArgs) -> Result<Worklist, String> {
    let mut config = match &globals.config {
        Some(path) => WorklistConfig::load_from_path(path).map_err(|e| e.to_string())?,
        None => WorklistConfig::default(),
    };
    if let Some(wells) = globals.plate {
        config.plate_wells = wells;
    }
    let target = match &globals.out {
        Some(path) => WorklistTarget::Path(path.into()),
        None => WorklistTarget::Memory,
    };
    Worklist::from_config(target, &config).map_err(|e| e.to_string())
}

/// Prints the closed worklist unless it went to a file.
fn finish_worklist(wl: Worklist, globals: &GlobalArgs) -> Result<(), String> {
    match &globals.out {
        Some(path) => info!("Wrote {} worklist line(s) to '{path}'", wl.line_count()),
        None => print!("{wl}"),
    }
    Ok(())
}

/// Operation results go to stdout only when the worklist itself does not.
fn report<T: Serialize>(value: &T, globals: &GlobalArgs) -> Result<(), String> {
    if globals.out.is_some() {
        return print_json(value);
    }
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| format!("Could not serialize JSON output: {e}"))?;
    eprintln!("{text}");
    Ok(())
}

fn read_picks(path: &str) -> Result<Vec<CherryPick>, String> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| format!("Could not read picks '{path}': {e}"))?;
    let mut picks = vec![];
    for record in rdr.deserialize::<PickRow>() {
        let row = record.map_err(|e| format!("Malformed pick in '{path}': {e}"))?;
        picks.push(CherryPick {
            part: row.part,
            clone: Some(row.clone).filter(|c| !c.is_empty()),
            dst_rack: row.dst,
            dst_position: PlatePosition::from(row.position),
            volume: row.volume,
        });
    }
    Ok(picks)
}

fn main() {
    init_logging();
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().collect();
    if args.len() <= 1 {
        usage();
        return Err("Missing command".to_string());
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{}", about::version_cli_text());
        return Ok(());
    }

    let (globals, cmd_idx) = parse_global_args(&args)?;
    if args.len() <= cmd_idx {
        usage();
        return Err("Missing command".to_string());
    }

    let command = &args[cmd_idx];

    match command.as_str() {
        "capabilities" => print_json(&capabilities()),
        "plate-info" => {
            let plate = plate_arg(&args, cmd_idx + 1)?;
            let last = plate.int2human(plate.n()).map_err(|e| e.to_string())?;
            print_json(&PlateInfo {
                wells: plate.n(),
                columns: plate.nx(),
                rows: plate.ny(),
                first: "A1".to_string(),
                last,
            })
        }
        "convert" => {
            let plate = plate_arg(&args, cmd_idx + 1)?;
            if args.len() <= cmd_idx + 2 {
                usage();
                return Err("Missing positions for convert".to_string());
            }
            let mut converted = vec![];
            for input in &args[cmd_idx + 2..] {
                let position = plate.human2int(input.as_str()).map_err(|e| e.to_string())?;
                let human = plate.int2human(position).map_err(|e| e.to_string())?;
                let (row, column) = plate.int2gridindex(position).map_err(|e| e.to_string())?;
                converted.push(ConvertedPosition {
                    input: input.clone(),
                    position,
                    human,
                    row,
                    column,
                });
            }
            print_json(&converted)
        }
        "row" | "column" => {
            let plate = plate_arg(&args, cmd_idx + 1)?;
            let input = args
                .get(cmd_idx + 2)
                .ok_or_else(|| format!("Missing position for {command}"))?;
            let wells = if command == "row" {
                plate.right_on_row(input.as_str())
            } else {
                plate.down_on_column(input.as_str())
            }
            .map_err(|e| e.to_string())?;
            print_json(&wells)
        }
        "op" => {
            if args.len() <= cmd_idx + 1 {
                usage();
                return Err("Missing operation JSON".to_string());
            }
            let json = load_json_arg(&args[cmd_idx + 1])?;
            let op: Operation =
                serde_json::from_str(&json).map_err(|e| format!("Invalid operation JSON: {e}"))?;
            let mut engine = WorklistEngine::new(open_worklist(&globals)?);
            let result = engine
                .scoped(&TracingNotifier, |engine| engine.apply(op))
                .map_err(|e| e.to_string())?;
            finish_worklist(engine.into_worklist(), &globals)?;
            report(&result, &globals)
        }
        "workflow" => {
            if args.len() <= cmd_idx + 1 {
                usage();
                return Err("Missing workflow JSON".to_string());
            }
            let json = load_json_arg(&args[cmd_idx + 1])?;
            let workflow: Workflow =
                serde_json::from_str(&json).map_err(|e| format!("Invalid workflow JSON: {e}"))?;
            let mut engine = WorklistEngine::new(open_worklist(&globals)?);
            let results = engine
                .scoped(&TracingNotifier, |engine| engine.apply_workflow(workflow))
                .map_err(|e| e.to_string())?;
            finish_worklist(engine.into_worklist(), &globals)?;
            report(&results, &globals)
        }
        "cherry-pick" => {
            if args.len() <= cmd_idx + 2 {
                usage();
                return Err("cherry-pick requires: PARTS.csv PICKS.csv".to_string());
            }
            let mut index = PartIndex::new();
            index
                .read_csv_path(&args[cmd_idx + 1])
                .map_err(|e| format!("{e:#}"))?;
            let picks = read_picks(&args[cmd_idx + 2])?;
            let opts = TransferOptions {
                by_label: args[cmd_idx + 3..].iter().any(|a| a == "--by-label"),
                ..TransferOptions::default()
            };
            let mut wl = open_worklist(&globals)?;
            let n = wl
                .scoped(&TracingNotifier, |wl| cherry_pick(wl, &index, &picks, &opts))
                .map_err(|e| e.to_string())?;
            info!("Cherry-picked {n} part(s)");
            finish_worklist(wl, &globals)
        }
        _ => {
            usage();
            Err(format!("Unknown command '{command}'"))
        }
    }
}
