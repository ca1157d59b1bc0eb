use crate::output::{render_up_summary, UserOutput};
use devup::{Stack, UpOptions};

pub async fn run_up(
    stack: &Stack,
    options: UpOptions,
    dry_run: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    if dry_run {
        let document = stack.plan(&options)?;
        out.status(&format!("# {} (dry run)", stack.compose_path().display()));
        out.status(document.trim_end());
        return Ok(());
    }

    if options.services.is_empty() {
        out.status("Bringing up all services...");
    } else {
        out.status(&format!("Bringing up {}...", options.services.join(", ")));
    }

    let summary = stack.up(&options).await?;
    out.blank();
    render_up_summary(&summary, out);
    out.blank();

    summary.outcome()?;
    out.success("All requested services are healthy");
    Ok(())
}
