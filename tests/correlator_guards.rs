use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use assert_matches::assert_matches;
use nabi::{
    ClientConfig, Command, CorrelatorError, DeviceClient, FakeTransport, FrameCodec,
    StatusInfoRequest, StopAudioRequest, Transport,
};

fn connect(transport: &Arc<FakeTransport>) -> DeviceClient {
    DeviceClient::with_config(
        Arc::clone(transport) as Arc<dyn Transport>,
        ClientConfig::builder()
            .ack_timeout(Duration::from_millis(100))
            .build(),
    )
}

#[tokio::test]
async fn duplicate_opcode_fails_fast_while_the_first_waits() -> Result<()> {
    let transport = Arc::new(FakeTransport::new());
    transport.stay_silent_on(Command::StatusInfo);
    let client = connect(&transport);

    let (first, second) = tokio::join!(
        client.send(&StatusInfoRequest),
        client.send(&StatusInfoRequest),
    );

    // Exactly one attempt made it onto the wire.
    assert_eq!(1, transport.sent_frames().len());
    assert_matches!(
        second,
        Err(CorrelatorError::DuplicateInFlight {
            command: Command::StatusInfo,
        })
    );
    assert_matches!(
        first,
        Err(CorrelatorError::AckTimeout {
            command: Command::StatusInfo,
            ..
        })
    );

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn command_slot_frees_after_a_timeout_and_a_retry_succeeds() -> Result<()> {
    let transport = Arc::new(FakeTransport::new());
    transport.stay_silent_on(Command::StopAudio);
    let client = connect(&transport);

    let first = client.send(&StopAudioRequest).await;
    assert_matches!(first, Err(CorrelatorError::AckTimeout { .. }));

    // Scripted replies outrank silence, so the retry gets its ack.
    transport.queue_reply(
        Command::StopAudio,
        FrameCodec::encode(Command::StopAudio, &[])?,
    );
    let notice = client.send(&StopAudioRequest).await?;
    assert_eq!(Command::StopAudio, notice.command());

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn stale_response_resolves_nothing_and_the_slot_stays_usable() -> Result<()> {
    let transport = Arc::new(FakeTransport::new());
    let client = connect(&transport);

    // An ack nobody asked for is dropped by the read loop.
    transport
        .push_incoming(FrameCodec::encode(Command::SetVolume, &[])?)
        .await;
    tokio::task::yield_now().await;

    let request = nabi::SetVolumeRequest {
        volume: nabi::Volume::new(4)?,
    };
    let notice = client.send(&request).await?;
    assert_eq!(Command::SetVolume, notice.command());

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn rejected_write_frees_the_slot_immediately() -> Result<()> {
    let transport = Arc::new(FakeTransport::new());
    transport.fail_next_send();
    let client = connect(&transport);

    let failed = client.send(&StopAudioRequest).await;
    assert_matches!(
        failed,
        Err(CorrelatorError::SendFailed {
            command: Command::StopAudio,
            ..
        })
    );

    let notice = client.send(&StopAudioRequest).await?;
    assert_eq!(Command::StopAudio, notice.command());

    client.close().await;
    Ok(())
}
