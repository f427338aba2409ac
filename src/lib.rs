use clap::{Parser, ValueEnum};
use miette::*;
use std::{
    fs,
    io::{self, Write},
    path::PathBuf,
    time::Duration,
};

mod data;
mod error;
pub mod expr;
mod model;
pub mod report;
pub mod solve;
pub mod stats;
pub mod validate;

pub use data::{CsvReader, Headers, SampleData};
pub use error::Error;
pub use expr::extract_symbols;
pub use model::{Derivative, EquationModel, FittedConstants, ModelKind, OdeNotation};
pub use solve::{fit, FitObserver, FitOptions, FitReport, Fitter, InitialSample, LogObserver};
pub use stats::{evaluate_fit, Covariance, FitMetrics};

/// CLI model fitting tool.
/// Fit the constants of an algebraic or ODE model to a CSV dataset.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct App {
    /// The model, eg `y = a*t^2 + b` or `y' = -k*y`.
    pub expr: String,

    /// Path to input CSV file.
    /// If left blank, stdin is read.
    ///
    /// Columns are positional: independent variables first, then one column per model component.
    pub data: Option<PathBuf>,

    /// The independent variables, comma separated. Defaults to `t`.
    ///
    /// An ODE declares its differentiated variable last, eg `y` or `t,y` for `y' = ...`.
    #[arg(long, default_value = "")]
    pub vars: String,

    /// The number of components the model is expected to have.
    #[arg(long)]
    pub components: Option<usize>,

    /// The output format to write to stdout.
    #[arg(short, long, default_value_t, value_enum)]
    pub out: Output,

    /// Do not output the fitting statistics along with the constants.
    #[arg(short, long)]
    pub no_stats: bool,

    /// Also write a tab separated results report to this path.
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Seed ODE fits with the second sample rather than the first.
    #[arg(long)]
    pub second_sample_ic: bool,

    /// Give up an ODE fit after this many seconds.
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Log more, repeat for more detail.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Copy, Clone, ValueEnum, Default)]
pub enum Output {
    /// Rich table view.
    #[default]
    Table,

    /// Plain, space separated table.
    Plain,

    /// JSON document.
    Json,
}

/// The outcome written by the `json` output.
#[derive(serde::Serialize)]
struct Outcome<'a> {
    model: String,
    independent_vars: &'a [String],
    #[serde(flatten)]
    fit: &'a FitReport,
    metrics: Option<FitMetrics>,
}

impl App {
    pub fn run(self) -> Result<()> {
        let App {
            expr,
            data,
            vars,
            components,
            out,
            no_stats,
            report,
            second_sample_ic,
            timeout,
            verbose: _,
        } = self;

        let mut opts = FitOptions::default();
        if second_sample_ic {
            opts.ode_initial_sample = InitialSample::Second;
        }
        if let Some(secs) = timeout {
            ensure!(
                secs.is_finite() && secs > 0.,
                "timeout must be a positive number of seconds"
            );
            opts.timeout = Some(Duration::from_secs_f64(secs));
        }

        let rdr = match &data {
            Some(path) => CsvReader::new(io::BufReader::new(
                fs::File::open(path)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("failed to open '{}'", path.display()))?,
            )),
            None => {
                eprintln!("Reading CSV from stdin");
                CsvReader::new(io::stdin())
            }
        };

        let with_path_ctx = || {
            data.as_ref()
                .map(|p| format!("in '{}'", p.display()))
                .unwrap_or_else(|| "from stdin".into())
        };

        let mut model = EquationModel::new(&expr, &validate::parse_vars(&vars))?;
        validate::check(&model, components)?;

        let samples = rdr.into_data().wrap_err_with(with_path_ctx)?;
        let fitted = Fitter::new(opts)
            .fit(&mut model, &samples)
            .wrap_err_with(with_path_ctx)?;

        let metrics = fitted.covariance.as_ref().and_then(|c| evaluate_fit(Some(c)).ok());

        if let Some(path) = &report {
            let path_str = data
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "stdin".into());
            let file = fs::File::create(path)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to create '{}'", path.display()))?;
            report::Report::new(&model, &vars, &path_str).write_csv(file)?;
        }

        let x = Outcome {
            model: model.model_string(),
            independent_vars: model.independent_vars(),
            fit: &fitted,
            metrics,
        };

        match out {
            Output::Table => write_table(&x, !no_stats).into_diagnostic(),
            Output::Plain => write_plain(&x, !no_stats).into_diagnostic(),
            Output::Json => {
                serde_json::to_writer_pretty(io::stdout(), &x).into_diagnostic()?;
                println!();
                Ok(())
            }
        }
    }
}

fn write_table(x: &Outcome, write_stats: bool) -> io::Result<()> {
    use comfy_table::{Cell, CellAlignment as CA, Row, Table};

    let w = &mut io::stdout();

    let mut nfmtr = "[~4]".parse::<numfmt::Formatter>().expect("just fine");

    let mut table = Table::new();

    let with_errs = x.metrics.is_some();
    if with_errs {
        table.set_header(["Constant", "Value", "Std Dev", "95% CI"]);
    } else {
        table.set_header(["Constant", "Value"]);
    }

    for (i, (p, v)) in x.fit.constants.iter().enumerate() {
        let mut row = Row::new();
        row.add_cell(Cell::new(p))
            .add_cell(Cell::new(nfmtr.fmt(v)).set_alignment(CA::Right));
        if let Some(m) = &x.metrics {
            row.add_cell(Cell::new(nfmtr.fmt(m.std_devs[i])).set_alignment(CA::Right))
                .add_cell(Cell::new(nfmtr.fmt(m.confidence_intervals[i])).set_alignment(CA::Right));
        }
        table.add_row(row);
    }

    table.load_preset(comfy_table::presets::UTF8_HORIZONTAL_ONLY);

    writeln!(w, "{table}")?;
    writeln!(w, "  Fitted model: {}", x.fit.resulting_function)?;

    if write_stats {
        writeln!(w, "  Number of observations: {}", x.fit.n)?;
        writeln!(
            w,
            "  Sum of squared residuals: {}",
            nfmtr.fmt(x.fit.ssr)
        )?;
        if let Some(m) = &x.metrics {
            writeln!(w, "  MSE: {}", nfmtr.fmt(m.mse))?;
            writeln!(w, "  RMSE: {}", nfmtr.fmt(m.rmse))?;
        }
    }

    Ok(())
}

fn write_plain(x: &Outcome, write_stats: bool) -> io::Result<()> {
    let w = &mut io::stdout();

    for (i, (p, v)) in x.fit.constants.iter().enumerate() {
        write!(w, "{p} {v}")?;
        if let Some(m) = &x.metrics {
            write!(w, " {} {}", m.std_devs[i], m.confidence_intervals[i])?;
        }
        writeln!(w)?;
    }

    if write_stats {
        writeln!(w, "n {}", x.fit.n)?;
        writeln!(w, "ssr {}", x.fit.ssr)?;
        if let Some(m) = &x.metrics {
            writeln!(w, "mse {}", m.mse)?;
            writeln!(w, "rmse {}", m.rmse)?;
        }
    }

    Ok(())
}
