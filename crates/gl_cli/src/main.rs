use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use gl_core::integrate::{IntegratorSettings, Method};
use gl_core::search::{find_s2_with, SearchResult, SearchSettings};
use gl_core::shooting::{shoot, RESIDUAL_SENTINEL};
use gl_core::sweep::{sweep_range, SweepPoint, SweepRange};
use gl_core::Couplings;
use serde::Serialize;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "gl-shoot",
    about = "Gregory-Laflamme growth rate s²(D) by Riccati shooting"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Solve for s² over a range of D and print a table
    Sweep(SweepArgs),
    /// Solve for s² at a single D
    Solve(SolveArgs),
    /// Evaluate the shooting residual for one trial s²
    Shoot(ShootArgs),
}

#[derive(Args, Debug, Clone, Copy)]
struct CouplingArgs {
    /// Reference wavenumber k
    #[arg(long, default_value_t = Couplings::default().k, allow_hyphen_values = true)]
    k: f64,
    /// Regulator strength λ
    #[arg(long, default_value_t = Couplings::default().lambda, allow_hyphen_values = true)]
    lambda: f64,
}

impl CouplingArgs {
    fn couplings(&self) -> Result<Couplings> {
        let couplings = Couplings::new(self.k, self.lambda);
        couplings.validate()?;
        Ok(couplings)
    }
}

#[derive(Args, Debug)]
struct SweepArgs {
    #[arg(long, default_value_t = SweepRange::default().start)]
    start: f64,
    #[arg(long, default_value_t = SweepRange::default().end)]
    end: f64,
    #[arg(long, default_value_t = SweepRange::default().points)]
    points: usize,
    #[command(flatten)]
    couplings: CouplingArgs,
    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct SolveArgs {
    /// Dimension D
    #[arg(long)]
    d: f64,
    #[command(flatten)]
    couplings: CouplingArgs,
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ShootArgs {
    /// Trial eigenvalue s²
    #[arg(long, allow_hyphen_values = true)]
    s2: f64,
    /// Dimension D
    #[arg(long)]
    d: f64,
    /// rk4, tsit5 or rosenbrock23
    #[arg(long, default_value_t = Method::Tsit5)]
    method: Method,
    #[command(flatten)]
    couplings: CouplingArgs,
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct ShotReport {
    s2: f64,
    d: f64,
    method: Method,
    residual: f64,
    failed: bool,
}

fn main() -> Result<()> {
    init_tracing();
    run(Cli::parse())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Sweep(args) => run_sweep(args),
        Command::Solve(args) => run_solve(args),
        Command::Shoot(args) => run_shoot(args),
    }
}

fn run_sweep(args: SweepArgs) -> Result<()> {
    let couplings = args.couplings.couplings()?;
    let range = SweepRange {
        start: args.start,
        end: args.end,
        points: args.points,
    };
    let started = Instant::now();
    let points = sweep_range(&range, &couplings, &SearchSettings::default())?;
    info!(points = points.len(), elapsed_secs = started.elapsed().as_secs_f64(), "sweep finished");

    if args.json {
        println!("{}", serde_json::to_string_pretty(&points).context("serialising sweep")?);
    } else {
        println!("{}", sweep_header());
        for point in &points {
            println!("{}", sweep_row(point));
        }
    }
    Ok(())
}

fn run_solve(args: SolveArgs) -> Result<()> {
    if !(args.d > 3.0) || !args.d.is_finite() {
        bail!("Dimension must be finite and above 3, got {}.", args.d);
    }
    let couplings = args.couplings.couplings()?;
    let result = find_s2_with(args.d, &couplings, &SearchSettings::default());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result).context("serialising result")?);
    } else {
        print!("{}", describe(&result));
    }
    Ok(())
}

fn run_shoot(args: ShootArgs) -> Result<()> {
    let couplings = args.couplings.couplings()?;
    let integrator = IntegratorSettings::with_method(args.method);
    let residual = shoot(args.s2, args.d, &couplings, &integrator);
    let report = ShotReport {
        s2: args.s2,
        d: args.d,
        method: args.method,
        residual,
        failed: residual == RESIDUAL_SENTINEL,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report).context("serialising shot")?);
    } else if report.failed {
        println!("residual = {residual:e} (integration failed)");
    } else {
        println!("residual = {residual:.6e}");
    }
    Ok(())
}

fn sweep_header() -> String {
    format!(
        "{:>7}  {:>11}  {:>11}  {:>10}  {:>13}  {:>8}",
        "D", "analytic", "numerical", "residual", "refinement", "time[s]"
    )
}

fn sweep_row(point: &SweepPoint) -> String {
    format!(
        "{:>7.3}  {:>11.6}  {:>11.6}  {:>10.2e}  {:>13}  {:>8.2}",
        point.d,
        point.analytic,
        point.s2,
        point.residual,
        point.refinement.label(),
        point.elapsed_secs
    )
}

fn describe(result: &SearchResult) -> String {
    format!(
        "D          = {}\n\
         guess      = {:.6}\n\
         coarse     = {:.6} (residual {:.3e})\n\
         s2         = {:.6} (residual {:.3e})\n\
         method     = {}\n\
         refinement = {}\n",
        result.d,
        result.guess,
        result.coarse,
        result.coarse_residual,
        result.s2,
        result.residual,
        result.method,
        result.refinement.label()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use gl_core::search::Refinement;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("gl-shoot").chain(args.iter().copied()))
    }

    #[test]
    fn sweep_defaults_match_library_defaults() {
        let cli = parse(&["sweep"]).unwrap();
        let Command::Sweep(args) = cli.command else {
            panic!("expected sweep");
        };
        assert_eq!(args.start, 3.6);
        assert_eq!(args.end, 4.4);
        assert_eq!(args.points, 17);
        assert_eq!(args.couplings.couplings().unwrap(), Couplings::default());
        assert!(!args.json);
    }

    #[test]
    fn negative_values_are_accepted() {
        let cli = parse(&["shoot", "--s2", "-0.5", "--d", "4", "--lambda", "-0.2"]).unwrap();
        let Command::Shoot(args) = cli.command else {
            panic!("expected shoot");
        };
        assert_eq!(args.s2, -0.5);
        assert_eq!(args.d, 4.0);
        assert_eq!(args.couplings.lambda, -0.2);
        assert_eq!(args.method, Method::Tsit5);
    }

    #[test]
    fn method_is_parsed_by_name() {
        let cli = parse(&["shoot", "--s2", "0", "--d", "4.4", "--method", "ros23"]).unwrap();
        let Command::Shoot(args) = cli.command else {
            panic!("expected shoot");
        };
        assert_eq!(args.method, Method::Rosenbrock23);
        assert!(parse(&["shoot", "--s2", "0", "--d", "4.4", "--method", "euler"]).is_err());
    }

    #[test]
    fn solve_requires_dimension() {
        assert!(parse(&["solve"]).is_err());
        let cli = parse(&["solve", "--d", "4.2", "--json"]).unwrap();
        assert!(matches!(cli.command, Command::Solve(SolveArgs { json: true, .. })));
    }

    #[test]
    fn solve_rejects_low_dimension() {
        let cli = parse(&["solve", "--d", "2.5"]).unwrap();
        assert!(run(cli).is_err());
    }

    #[test]
    fn table_row_lines_up_with_header() {
        let point = SweepPoint {
            d: 4.05,
            analytic: 0.05077,
            s2: 0.071,
            residual: 3.2e-6,
            refinement: Refinement::Converged { iterations: 6 },
            elapsed_secs: 1.5,
        };
        let row = sweep_row(&point);
        assert_eq!(row.len(), sweep_header().len());
        assert!(row.contains("converged"));
        assert!(row.trim_start().starts_with("4.050"));
    }
}
