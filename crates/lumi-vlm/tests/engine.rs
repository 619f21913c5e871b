mod common;

use std::io::Write;

use candle_core::Device;
use common::{config, tokenizer, tower, two_tone, ScriptedModel};
use lumi_image::{EncodedImage, PlatformImage};
use lumi_vlm::{
    Engine, EngineConfig, ErrorKind, SessionId, SessionState, Status, Step, VlmError,
};

fn engine() -> Engine<ScriptedModel> {
    Engine::new(tower(), tokenizer(), config(), &Device::Cpu).unwrap()
}

#[test]
fn boundary_add_image_status_codes() -> Result<(), VlmError> {
    let mut engine = engine();
    let id = engine.open_session(ScriptedModel::new(&["ok"]))?;

    let image = two_tone();
    let status = Status::from_result(&engine.add_image(id, Some(&image)));
    assert_eq!(status, Status::OK);
    assert_eq!(engine.session(id)?.queue().len(), 1);

    let status = Status::from_result(&engine.add_image(id, None));
    assert_eq!(status.code, 1);
    assert_eq!(
        status.message.as_deref(),
        Some("invalid image handle: null image handle")
    );

    let garbage = EncodedImage::from_bytes(vec![0u8; 16]);
    let status = Status::from_result(&engine.add_image(id, Some(&garbage)));
    assert_eq!(status.code, 2);

    let status = Status::from_result(&engine.add_image(SessionId::from_raw(999), Some(&image)));
    assert_eq!(status.code, 8);

    assert_eq!(engine.session(id)?.queue().len(), 1);
    Ok(())
}

#[test]
fn null_handle_while_generating_reports_state() -> Result<(), VlmError> {
    let mut engine = engine();
    let id = engine.open_session(ScriptedModel::new(&["ok"]))?;
    engine.add_text(id, "hi")?;
    engine.start_generation(id)?;

    let err = engine.add_image(id, None).unwrap_err();
    assert_eq!(err.status_code(), 4);
    Ok(())
}

#[test]
fn full_round_trip_through_handles() -> Result<(), VlmError> {
    let mut engine = engine();
    let id = engine.open_session(ScriptedModel::new(&["two colors"]))?;
    assert_eq!(engine.state(id)?, SessionState::AcceptingInput);

    let image = two_tone();
    let handle: &dyn PlatformImage = &image;
    engine.add_image(id, Some(handle))?;
    engine.add_text(id, "describe")?;
    engine.start_generation(id)?;
    assert_eq!(engine.state(id)?, SessionState::Generating);

    let mut text = String::new();
    loop {
        match engine.next_token(id)? {
            Step::Token { text: piece, .. } => text.push_str(&piece),
            Step::Done(_) => break,
        }
    }
    assert_eq!(text, "two colors");
    assert_eq!(engine.state(id)?, SessionState::AcceptingInput);
    Ok(())
}

#[test]
fn closed_handles_are_remembered() -> Result<(), VlmError> {
    let mut engine = engine();
    let a = engine.open_session(ScriptedModel::new(&[]))?;
    let b = engine.open_session(ScriptedModel::new(&[]))?;
    assert_ne!(a, b);
    assert_eq!(engine.live_sessions(), 2);

    engine.close_session(a)?;
    assert_eq!(engine.live_sessions(), 1);
    assert_eq!(engine.state(a)?, SessionState::Closed);

    let image = two_tone();
    let err = engine.add_image(a, Some(&image)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionClosed);
    assert_eq!(engine.close_session(a).unwrap_err().status_code(), 5);
    assert_eq!(engine.next_token(a).unwrap_err().status_code(), 5);

    let unknown = SessionId::from_raw(42);
    assert_eq!(engine.state(unknown).unwrap_err().kind(), ErrorKind::InvalidSession);
    assert_eq!(
        engine.close_session(unknown).unwrap_err().to_string(),
        "invalid session: session #42 does not exist"
    );

    engine.add_text(b, "still alive")?;
    Ok(())
}

#[test]
fn failed_sessions_are_released_on_close() -> Result<(), VlmError> {
    let mut engine = engine();
    let id = engine.open_session(ScriptedModel::new(&["abc"]).failing_at(0))?;
    engine.add_text(id, "q")?;
    engine.start_generation(id)?;
    assert_eq!(engine.next_token(id).unwrap_err().status_code(), 7);
    assert_eq!(engine.state(id)?, SessionState::Error);

    assert_eq!(engine.close_session(id).unwrap_err().status_code(), 5);
    assert_eq!(engine.live_sessions(), 0);
    assert_eq!(engine.state(id)?, SessionState::Closed);
    Ok(())
}

#[test]
fn stop_generation_by_handle() -> Result<(), VlmError> {
    let mut engine = engine();
    let id = engine.open_session(ScriptedModel::new(&["abcdef"]))?;
    engine.add_text(id, "q")?;
    engine.start_generation(id)?;
    engine.next_token(id)?;
    engine.stop_generation(id)?;
    assert_eq!(engine.state(id)?, SessionState::AcceptingInput);
    assert_eq!(engine.stop_generation(id).unwrap_err().status_code(), 4);
    Ok(())
}

#[test]
fn engine_from_config_file() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(
        file,
        r#"{{
            "generation": {{ "max_new_tokens": 3, "sampling": {{ "do_sample": false }} }},
            "prompt": {{ "persona": "witty", "user_name": "Ada" }}
        }}"#
    )?;

    let config = EngineConfig::from_json_file(file.path())?;
    let mut engine: Engine<ScriptedModel> =
        Engine::new(tower(), tokenizer(), config, &Device::Cpu)?;
    assert_eq!(engine.config().prompt.user_name, "Ada");

    let id = engine.open_session(ScriptedModel::new(&["abcdef"]))?;
    engine.add_text(id, "q")?;
    engine.start_generation(id)?;
    let mut tokens = 0;
    while let Step::Token { .. } = engine.next_token(id)? {
        tokens += 1;
    }
    assert_eq!(tokens, 3);
    Ok(())
}

#[test]
fn invalid_config_is_rejected() {
    let mut config = EngineConfig::default();
    config.generation.sampling.top_p = 0.0;
    let err = Engine::<ScriptedModel>::new(tower(), tokenizer(), config, &Device::Cpu).unwrap_err();
    assert_eq!(err.status_code(), 11);
}
