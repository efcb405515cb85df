use harbor::config::Config;
use harbor::http::{Request, Response};
use harbor::server::listener;

/// Echoes the request line and body back to the caller.
fn echo(req: &Request, res: &mut Response) {
    res.set_header("Content-Type", "text/plain");
    res.append_body(format!("{} {} {}\n", req.method, req.target, req.version));
    if !req.body.is_empty() {
        res.append_body(req.body.clone().freeze());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;

    tokio::select! {
        res = listener::run(&cfg.server, echo) => {
            res?;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}
