use chrono::Local;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Duplicates log output to the console and an append-only log file.
/// The file is the record of the run; a closed console does not stop it.
struct Tee<C> {
    console: C,
    file: File,
}

impl<C: Write> Write for Tee<C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        let _ = self.console.write_all(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.console.flush();
        self.file.flush()
    }
}

/// `RUST_LOG` overrides the default level when set.
pub fn init(log_file: Option<&Path>, verbose: bool) -> io::Result<()> {
    let mut builder = Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, if verbose { LevelFilter::Debug } else { LevelFilter::Info })
        // html5ever and reqwest internals are noisy at debug
        .filter(Some("html5ever"), LevelFilter::Warn)
        .filter(Some("selectors"), LevelFilter::Warn)
        .filter(Some("reqwest"), LevelFilter::Info);

    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }

    if let Some(path) = log_file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(Tee {
            console: io::stderr(),
            file,
        })));
    }

    // A second init (tests, embedding) keeps the first logger.
    if builder.try_init().is_ok() {
        log::info!("Logger initialized.");
    }
    Ok(())
}
