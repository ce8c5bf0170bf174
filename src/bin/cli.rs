use chaplygin::{ParseMode, Solution, SolveError, Solver, SolverSettings, Task};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::process;

#[derive(Clone, Copy, ValueEnum)]
enum Example {
    /// x' = t + 2x², x(0) = 0 on [0, 1/2]
    Riccati,
    /// x' = 2x, x(0) = 1 on [0, 1/4]
    Exponential,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Parser)]
#[command(name = "chaplygin")]
#[command(about = "Approximate x'(t) = f(t, x) between Chaplygin's upper and lower bounds")]
#[command(version)]
struct Args {
    /// Right-hand side f(t, x(t)), e.g. "t+2x(t)^2"
    #[arg(short, long, required_unless_present = "example")]
    differential: Option<String>,

    /// Initial condition, e.g. "x(0)=0"
    #[arg(short, long, default_value = "x(0)=0")]
    initial: String,

    /// Interval, e.g. "[0,1/2]"
    #[arg(short, long, default_value = "[0,1/2]")]
    section: String,

    /// Target width of the bracket at the end of the interval
    #[arg(short, long, default_value_t = 0.1)]
    accuracy: f64,

    /// Solve one of the built-in tasks instead
    #[arg(short, long, value_enum, conflicts_with = "differential")]
    example: Option<Example>,

    /// Number of grid intervals to print the solution on
    #[arg(long, default_value_t = 10)]
    samples: usize,

    /// Maximum number of refinement levels
    #[arg(long, default_value_t = 4)]
    max_iterations: usize,

    /// Reject malformed numbers instead of defaulting them to zero
    #[arg(long)]
    strict: bool,

    /// Print the stack program of the right-hand side
    #[arg(long)]
    show_program: bool,

    /// Log level for solver diagnostics
    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = TermLogger::init(
        args.log_level.into(),
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ) {
        eprintln!("{} logging disabled: {}", "Warning:".yellow().bold(), e);
    }

    let task = match args.example {
        Some(Example::Riccati) => Task::riccati_example(),
        Some(Example::Exponential) => Task::exponential_example(),
        None => Task::new(
            args.differential.clone().unwrap_or_default(),
            args.initial.clone(),
            args.section.clone(),
            args.accuracy,
        ),
    };

    match run(&args, &task) {
        Ok(solution) => report(&args, &solution),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}

fn run(args: &Args, task: &Task) -> Result<Solution, SolveError> {
    let mode = if args.strict {
        ParseMode::Strict
    } else {
        ParseMode::Lenient
    };
    let settings = SolverSettings::default()
        .with_max_iterations(args.max_iterations)
        .with_parse_mode(mode);
    Solver::new(settings)?.solve(task)
}

fn report(args: &Args, solution: &Solution) {
    let interval = solution.interval();
    println!(
        "{} x' = {} on {}",
        "Solved".green().bold(),
        solution.rhs().expression(),
        interval
    );
    println!(
        "  error bound {}  after {} iteration(s)",
        format!("{}", solution.error()).cyan(),
        solution.iterations()
    );

    if args.show_program {
        match solution.rhs().equation().program() {
            Ok(program) => println!("\n{}\n{}", "Program:".bold(), program),
            Err(e) => eprintln!("{} {}", "Warning:".yellow().bold(), e),
        }
    }

    println!(
        "\n{:>12}  {:>14}  {:>14}  {:>14}",
        "t".bold(),
        "lower".bold(),
        "x".bold(),
        "upper".bold()
    );
    for (t, x) in solution.sample(args.samples) {
        println!(
            "{:>12.6}  {:>14.8}  {:>14.8}  {:>14.8}",
            t,
            solution.lower(t),
            x,
            solution.upper(t)
        );
    }
}
