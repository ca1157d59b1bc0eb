use crate::output::UserOutput;
use devup::Stack;

pub async fn run_down(stack: &Stack, out: &dyn UserOutput) -> anyhow::Result<()> {
    out.status("Stopping all containers...");
    stack.down().await?;
    out.success("Stopped. Data and containers are kept; run `devup up` to continue");
    Ok(())
}

pub async fn run_reset(stack: &Stack, volumes: bool, out: &dyn UserOutput) -> anyhow::Result<()> {
    if volumes {
        out.warning("Removing containers, network and volumes. All local data is dropped.");
    } else {
        out.status("Removing containers and network...");
    }
    stack.reset(volumes).await?;
    if volumes {
        out.success("Reset complete");
    } else {
        out.success("Reset complete. Volumes were kept; use -v to remove them");
    }
    Ok(())
}
