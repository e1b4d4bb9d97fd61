//! Command handlers translating MQTT payloads into bus messages

use serde_json::json;
use tracing::info;

use crate::bus::{events, Message};
use crate::error::CommandError;
use crate::features::{payload, FeatureId};
use crate::mqtt::router::CommandHandler;

/// Handler for a command-capable feature, `None` for pure sensors
pub fn handler_for(feature: FeatureId, lang: &str) -> Option<CommandHandler> {
    match feature {
        FeatureId::MicMute => Some(Box::new(mic_mute)),
        FeatureId::VolumeMute => Some(Box::new(volume_mute)),
        FeatureId::ListenButton => Some(Box::new(listen_button)),
        FeatureId::Command => {
            let lang = lang.to_string();
            Some(Box::new(move |text: &str| utterance(text, &lang)))
        }
        FeatureId::Speaking | FeatureId::Listening => None,
    }
}

fn unknown(feature: FeatureId, value: &str) -> CommandError {
    CommandError::UnknownPayload {
        feature,
        payload: value.to_string(),
    }
}

/// The status query after the switch makes the bus confirm the new state
pub fn mic_mute(value: &str) -> Result<Vec<Message>, CommandError> {
    let switch = match value {
        payload::ON => {
            info!("Mic mute switched on via MQTT");
            events::MIC_MUTE
        }
        payload::OFF => {
            info!("Mic mute switched off via MQTT");
            events::MIC_UNMUTE
        }
        other => return Err(unknown(FeatureId::MicMute, other)),
    };
    Ok(vec![Message::new(switch), Message::new(events::MIC_GET_STATUS)])
}

pub fn volume_mute(value: &str) -> Result<Vec<Message>, CommandError> {
    let msg_type = match value {
        payload::ON => {
            info!("Volume mute switched on via MQTT");
            events::VOLUME_MUTE
        }
        payload::OFF => {
            info!("Volume mute switched off via MQTT");
            events::VOLUME_UNMUTE
        }
        other => return Err(unknown(FeatureId::VolumeMute, other)),
    };
    Ok(vec![
        Message::new(msg_type).with_data(json!({ "speak_message": false }))
    ])
}

pub fn listen_button(value: &str) -> Result<Vec<Message>, CommandError> {
    if value != payload::PRESS {
        return Err(unknown(FeatureId::ListenButton, value));
    }
    info!("Listening triggered via MQTT");
    Ok(vec![Message::new(events::MIC_LISTEN)])
}

/// Injects `text` as a spoken utterance
///
/// Blank payloads are ignored on purpose. Publishing an empty retained payload
/// is how a broker deletes the retained command, and that must not reach the
/// assistant as speech.
pub fn utterance(text: &str, lang: &str) -> Result<Vec<Message>, CommandError> {
    if text.trim().is_empty() {
        return Err(CommandError::EmptyUtterance);
    }
    info!("Injecting utterance {:?}", text);
    Ok(vec![Message::new(events::UTTERANCE).with_data(json!({
        "utterances": [text],
        "lang": lang,
    }))])
}
