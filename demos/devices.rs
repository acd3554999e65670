use guide_voice_utils as utils;

fn main() -> anyhow::Result<()> {
    println!("Available inputs:\n{}", utils::device::list_inputs()?);
    println!("Available outputs:\n{}", utils::device::list_outputs()?);
    Ok(())
}
