use std::env;
use std::str::FromStr;

use tracing::{error, info_span, Level};

use mirrordb::{init_runtime, init_settings, init_tracing, run};


fn main() {
    let level = env::var("MIRRORDB_LOG")
        .ok()
        .and_then(|s| Level::from_str(&s).ok())
        .unwrap_or(Level::INFO);
    init_tracing(level);

    let conf = {
        let _span = info_span!("startup").entered();
        match init_settings() {
            Ok(conf) => conf,
            Err(e) => {
                error!(%e, "could not load config");
                std::process::exit(1);
            },
        }
    };

    let tokio = init_runtime(&conf).expect("could not create tokio runtime");
    if let Err(e) = run(&conf, &tokio) {
        error!(%e, "mirrordb failed");
        std::process::exit(1);
    }
}
