use console::style;
use env_logger::{Builder, Env, Target};
use log::Level;
use std::io::Write;

fn level_label(level: Level) -> String {
    match level {
        Level::Error => style("ERROR").red().bold().to_string(),
        Level::Warn => style("WARN ").yellow().bold().to_string(),
        Level::Info => style("INFO ").green().to_string(),
        Level::Debug => style("DEBUG").cyan().to_string(),
        Level::Trace => style("TRACE").dim().to_string(),
    }
}

/// Initialize the stderr logger.
///
/// `RUST_LOG` wins when set; otherwise `--verbose` selects `debug` and the
/// default is `warn`. Stdout is reserved for the JSON result.
pub fn init_logger(verbose: bool) {
    let env = Env::default().filter_or("RUST_LOG", if verbose { "debug" } else { "warn" });

    Builder::from_env(env)
        .target(Target::Stderr)
        .format(move |buf, record| {
            if verbose {
                writeln!(
                    buf,
                    "{} {} {}",
                    level_label(record.level()),
                    style(record.target()).dim(),
                    record.args()
                )
            } else {
                writeln!(buf, "{} {}", level_label(record.level()), record.args())
            }
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_keep_level_names() {
        console::set_colors_enabled(false);
        assert_eq!(level_label(Level::Debug), "DEBUG");
        assert_eq!(level_label(Level::Warn), "WARN ");
    }
}
