use crate::output::{status_lines, UserOutput};
use devup::Stack;

pub async fn run_status(stack: &Stack, json: bool, out: &dyn UserOutput) -> anyhow::Result<()> {
    let entries = stack.status().await?;

    if json {
        out.status(&serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    out.status(&format!("Stack '{}':", stack.project()));
    out.status(&format!(
        "  {:<28} {:<15} {:<10} {:<10} {}",
        "NODE", "KIND", "STATUS", "HEALTH", "PORT"
    ));
    out.status(&format!("{:-<80}", ""));
    for line in status_lines(&entries) {
        out.status(&line);
    }
    Ok(())
}
