use crate::output::{render_up_summary, UserOutput};
use devup::Stack;

pub async fn run_restart(stack: &Stack, services: Vec<String>, out: &dyn UserOutput) -> anyhow::Result<()> {
    if services.is_empty() {
        out.status("Restarting all services...");
    } else {
        out.status(&format!("Restarting {}...", services.join(", ")));
    }

    let summary = stack.restart(&services).await?;
    out.blank();
    render_up_summary(&summary, out);
    out.blank();

    summary.outcome()?;
    out.success("Restarted");
    Ok(())
}
