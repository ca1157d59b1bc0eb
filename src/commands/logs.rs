use crate::output::UserOutput;
use devup::Stack;
use futures::StreamExt;

pub async fn run_logs(
    stack: &Stack,
    service: Option<String>,
    tail: Option<usize>,
    follow: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let mut stream = stack.logs(service.as_deref(), follow, tail).await?;

    if follow {
        let target = service.as_deref().unwrap_or("all containers");
        out.status(&format!("Following logs for {} (Press Ctrl+C to stop):", target));
        out.status(&format!("{:-<50}", ""));
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                out.status("\nStopped following logs");
                break;
            }
            line = stream.next() => match line {
                Some(Ok(line)) => out.status(&line),
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }
    }
    Ok(())
}
