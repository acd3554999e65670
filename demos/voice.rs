use tracing::Level;
use tracing_subscriber::fmt::time::ChronoLocal;

use guide_voice::{
    inbox, ChannelConfig, CpalOutput, Microphone, SessionController, WsConnector,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv_override().ok();

    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let (inbox_tx, inbox_rx) = inbox();
    let output = CpalOutput::start(None, inbox_tx.clone())?;
    let (controller, handle) = SessionController::new(inbox_tx, inbox_rx, output);

    let connector = WsConnector::new(ChannelConfig::new());
    let running = tokio::spawn(controller.run(connector, Microphone::default()));

    let mut state = handle.state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            println!("session state: {:?}", *state.borrow());
        }
    });

    let mut speaking = handle.agent_speaking();
    tokio::spawn(async move {
        while speaking.changed().await.is_ok() {
            if *speaking.borrow() {
                println!("guide is speaking...");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    println!("Received Ctrl-C, shutting down...");
    handle.stop().await;

    let outcome = running.await?;
    println!("final state: {:?}", outcome.state);
    println!("--- transcript ---");
    println!("{}", outcome.transcript.snapshot());
    Ok(())
}
