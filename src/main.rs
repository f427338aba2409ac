use clap::Parser;
use log::{Level, LevelFilter, Log, Metadata, Record};
use modelfit::App;

/// Writes log records to stderr.
struct StderrLog;

static LOGGER: StderrLog = StderrLog;

impl Log for StderrLog {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let lvl = match record.level() {
                Level::Error => "error",
                Level::Warn => "warn",
                Level::Info => "info",
                Level::Debug => "debug",
                Level::Trace => "trace",
            };
            eprintln!("[{lvl} {}] {}", record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

fn main() -> miette::Result<()> {
    let app = App::parse();

    let level = match app.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }

    app.run()
}
