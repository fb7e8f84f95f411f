// Tests for the wire frame shapes on the three channels

use convo_stream::{TextFrame, TtsControl, UploadControl};
use convo_stream::channel::{TextRequest, TtsRequest};
use serde_json::{json, Value};

#[test]
fn test_upload_start_uses_camel_case_fields() {
    let start = UploadControl::Start {
        conversation_id: "c1".to_string(),
        model: "free".to_string(),
        accent: "American English".to_string(),
        sample_rate: 48000,
        format: "audio/pcm;codec=s16le".to_string(),
        asr_provider: "whisper".to_string(),
    };

    let v: Value = serde_json::to_value(&start).unwrap();
    assert_eq!(
        v,
        json!({
            "type": "start",
            "conversationId": "c1",
            "model": "free",
            "accent": "American English",
            "sampleRate": 48000,
            "format": "audio/pcm;codec=s16le",
            "asrProvider": "whisper",
        })
    );
}

#[test]
fn test_upload_stop_is_bare_control_frame() {
    let v: Value = serde_json::to_value(&UploadControl::Stop).unwrap();
    assert_eq!(v, json!({ "type": "stop" }));
}

#[test]
fn test_subscribe_and_tts_start_requests() {
    let v: Value = serde_json::to_value(&TextRequest::Subscribe {
        conversation_id: "c2".to_string(),
    })
    .unwrap();
    assert_eq!(v, json!({ "type": "subscribe", "conversationId": "c2" }));

    let v: Value = serde_json::to_value(&TtsRequest::Start {
        conversation_id: "c3".to_string(),
    })
    .unwrap();
    assert_eq!(v, json!({ "type": "start", "conversationId": "c3" }));
}

#[test]
fn test_text_frames_parse() {
    let frame: TextFrame =
        serde_json::from_str(r#"{"type":"interim","text":"hel","ts":1.5,"confidence":0.4}"#)
            .unwrap();
    match frame {
        TextFrame::Interim {
            text,
            ts,
            confidence,
        } => {
            assert_eq!(text, "hel");
            assert_eq!(ts, Some(1.5));
            assert_eq!(confidence, Some(0.4));
        }
        other => panic!("unexpected frame: {:?}", other),
    }

    let frame: TextFrame =
        serde_json::from_str(r#"{"type":"final","text":"hello"}"#).unwrap();
    match frame {
        TextFrame::Final {
            text,
            ts,
            confidence,
        } => {
            assert_eq!(text, "hello");
            assert_eq!(ts, None);
            assert_eq!(confidence, None);
        }
        other => panic!("unexpected frame: {:?}", other),
    }

    assert!(matches!(
        serde_json::from_str(r#"{"type":"ready","conversationId":"c1"}"#).unwrap(),
        TextFrame::Ready { .. }
    ));
    assert!(matches!(
        serde_json::from_str(r#"{"type":"pong"}"#).unwrap(),
        TextFrame::Pong
    ));
}

#[test]
fn test_unknown_text_frame_is_an_error() {
    // The router logs and drops frames that fail to parse.
    assert!(serde_json::from_str::<TextFrame>(r#"{"type":"bogus","text":"x"}"#).is_err());
    assert!(serde_json::from_str::<TextFrame>(r#"{"notype":true}"#).is_err());
}

#[test]
fn test_tts_control_frames_parse() {
    match serde_json::from_str::<TtsControl>(r#"{"type":"start","mime":"audio/mpeg"}"#).unwrap() {
        TtsControl::Start { mime } => assert_eq!(mime.as_deref(), Some("audio/mpeg")),
        other => panic!("unexpected frame: {:?}", other),
    }

    // The mime hint is optional.
    match serde_json::from_str::<TtsControl>(r#"{"type":"start"}"#).unwrap() {
        TtsControl::Start { mime } => assert!(mime.is_none()),
        other => panic!("unexpected frame: {:?}", other),
    }

    assert!(matches!(
        serde_json::from_str(r#"{"type":"stop"}"#).unwrap(),
        TtsControl::Stop
    ));
    assert!(matches!(
        serde_json::from_str(r#"{"type":"ready","conversationId":"c1"}"#).unwrap(),
        TtsControl::Ready { .. }
    ));
}
