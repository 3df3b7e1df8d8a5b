use anyhow::Result;
use idiomize_cli::{build_cli, format_report, run};
use tracing::warn;

fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    // Initialize logging
    if matches.get_flag("debug") {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("idiomize_core=debug"))
            .init();
    } else {
        idiomize_core::init_tracing();
    }

    let summary = run(&matches)?;

    if let Some(output) = &summary.output {
        println!("{output}");
    }
    if let Some(marks) = &summary.marks {
        println!("{marks}");
    }
    eprintln!("{}", format_report(&summary));

    if !summary.success() {
        warn!(
            unresolved = summary.run.unresolved.len(),
            "type mismatches left for a later type check"
        );
    }
    Ok(())
}
