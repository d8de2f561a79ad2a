use log::LevelFilter;
use env_logger::Builder;
use std::io::Write;
use chrono::Local;

/// Console logging as `2024-05-01 10:00:00 [INFO] scraper - message`.
/// `RUST_LOG` takes precedence over `default_level`.
pub fn init(default_level: LevelFilter) {
    let result = Builder::new()
        .format(|buf, record| {
            let module = record
                .module_path()
                .and_then(|m| m.rsplit("::").next())
                .unwrap_or("-");
            writeln!(buf,
                "{} [{}] {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                module,
                record.args()
            )
        })
        .filter(None, default_level)
        .parse_default_env()
        .try_init();

    if result.is_ok() {
        log::debug!("Logger initialized at {}", default_level);
    }
}
