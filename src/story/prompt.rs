//! Prompt assembly: turn a day's buffered messages plus downloaded images
//! into the ordered content parts sent to the generation backend.

use crate::settings::{Genre, Personality};
use crate::{ContentPart, Message, MessageKind};
use std::collections::HashMap;

/// Caption and text bodies are clipped to this many characters in the log.
const MAX_ENTRY_CHARS: usize = 150;

fn personality_instruction(personality: Personality) -> (&'static str, &'static str) {
    match personality {
        Personality::Neutral => (
            "You are the chat's Neutral Chronicler. Keep an objective, informative tone.",
            "",
        ),
        Personality::Wise => (
            "You are the Wise Elder chronicling this chat. Use a calm, thoughtful, \
             slightly philosophical tone. Avoid slang and haste. Your goal is to find \
             meaning or a lesson even in the mundane.",
            "\n\n_(Chronicler's thought: )_",
        ),
        Personality::Sarcastic => (
            "You are the Sarcastic Observer chronicling this chat. Your tone is dry irony \
             aimed at common human habits visible in the chat, never at individual people \
             or their opinions. Never insult or belittle anyone. Aim for a smile of \
             recognition, and keep the irony subtle.",
            "\n\n_(Margin note: )_",
        ),
        Personality::Poet => (
            "You are the Romantic Poet keeping this chat's chronicle. Use elevated, \
             metaphorical language. Notice emotion, the beauty of the moment, and the \
             fleeting nature of conversation. Convey the day's poetic atmosphere, not \
             just its facts.",
            "\n\n~~~\n\n~~~\n",
        ),
    }
}

fn genre_instruction(genre: Genre) -> &'static str {
    match genre {
        Genre::Default => {
            "Write a coherent, engaging story of the day's events in the chat (1-3 paragraphs)."
        }
        Genre::Humor => {
            "Write a humorous story of the day (1-3 paragraphs). Find and highlight the \
             funny moments, exchanges, and misunderstandings. The goal is a smile."
        }
        Genre::Detective => {
            "Present the day's events as a detective mystery (1-3 paragraphs). Hint at \
             clues, playful suspects, and the central riddle of the day."
        }
        Genre::Fantasy => {
            "Write a fantasy story of the day (1-3 paragraphs). Give the events an epic \
             or magical cast, borrowing imagery of quests, artifacts, and guilds."
        }
        Genre::NewsReport => {
            "Write a short news report on the day's events (2-4 paragraphs). Stay \
             objective, use a formal register and paraphrased quotes, and name the key \
             speakers."
        }
    }
}

/// The fixed opening text part: personality, genre, and log framing.
fn preamble(genre: Genre, personality: Personality) -> String {
    let (persona, _) = personality_instruction(personality);
    format!(
        "{persona} Your task is to analyse the message log (and the [IMAGE N] images, \
         when present) for the period and produce a write-up.\n\
         {}\n\
         Use Markdown: invent a bold title, use paragraphs, mention *user names* in \
         italics. Do not quote verbatim, retell the substance. Briefly describe one or \
         two key images ([IMAGE N]) if they matter, and who sent them. Base everything \
         strictly on the log.\n\n\
         MESSAGE LOG FOR THE PERIOD:\n\
         ---------------------------------\n",
        genre_instruction(genre)
    )
}

/// The fixed closing text part, including any personality sign-off request.
fn closing(personality: Personality) -> String {
    let (_, sign_off) = personality_instruction(personality);
    let mut instruction = String::from("Now, do your work as the Chronicler.");
    if !sign_off.is_empty() {
        instruction.push_str(&format!(
            " Remember to add a final note in your style ({sign_off})."
        ));
    }
    format!("\n---------------------------------\nEND OF LOG.\n\n{instruction}\n")
}

fn clip(text: &str) -> String {
    if text.chars().count() > MAX_ENTRY_CHARS {
        let clipped: String = text.chars().take(MAX_ENTRY_CHARS).collect();
        format!("{clipped}...")
    } else {
        text.to_string()
    }
}

/// One log line for a message. `image_number` is set when the photo's bytes
/// are part of the prompt, in which case the line carries its placeholder.
fn log_entry(message: &Message, image_number: Option<usize>) -> String {
    let time = message.timestamp.format("%H:%M UTC");
    let name = &message.display_name;
    let caption = message.text.as_deref().map(clip);
    let head = format!("[{time}] *{name}*: ");

    let body = match (message.kind, image_number) {
        (MessageKind::Photo, Some(n)) => match caption {
            Some(c) => format!("sent an image [IMAGE {n}] with the caption: \"{c}\""),
            None => format!("sent an image [IMAGE {n}]"),
        },
        (MessageKind::Photo, None) => match caption {
            Some(c) => format!("sent a photo (not analysed) \"{c}\""),
            None => "sent a photo (not analysed)".to_string(),
        },
        (MessageKind::Text, _) => match caption {
            Some(c) => format!("wrote: \"{c}\""),
            None => "wrote an empty message".to_string(),
        },
        (MessageKind::Video, _) => match caption {
            Some(c) => format!("sent a video \"{c}\" (content not analysed)"),
            None => "sent a video (content not analysed)".to_string(),
        },
        (MessageKind::Sticker, _) => match caption {
            Some(c) => format!("sent a sticker ({c})"),
            None => "sent a sticker".to_string(),
        },
        (MessageKind::Voice, _) => "recorded a voice message".to_string(),
        (MessageKind::VideoNote, _) => "recorded a video note".to_string(),
        (MessageKind::Document, _) => {
            let file = message.file_name.as_deref().unwrap_or("unnamed");
            match caption {
                Some(c) => format!("sent the document '{file}' \"{c}\""),
                None => format!("sent the document '{file}'"),
            }
        }
        (MessageKind::Audio, _) => {
            let file = message.file_name.as_deref().unwrap_or("unnamed");
            match caption {
                Some(c) => format!("sent the audio '{file}' \"{c}\""),
                None => format!("sent the audio '{file}'"),
            }
        }
        (MessageKind::Unknown, _) => match caption {
            Some(c) => format!("sent media with the caption: \"{c}\""),
            None => "sent a message of an unrecognised kind".to_string(),
        },
    };

    format!("{head}{body}\n")
}

/// Assemble the full prompt: preamble, coalesced log blocks interleaved with
/// image bytes at their chronological positions, and the closing instruction.
///
/// Returns `None` when the buffer carries nothing worth narrating. The input
/// is expected to already be in chronological order; assembly preserves it.
pub fn assemble(
    messages: &[Message],
    images: &HashMap<String, Vec<u8>>,
    genre: Genre,
    personality: Personality,
) -> Option<Vec<ContentPart>> {
    if messages.is_empty() {
        return None;
    }

    let mut parts = vec![ContentPart::Text(preamble(genre, personality))];
    let mut block = String::new();
    let mut image_counter = 0usize;

    for message in messages {
        let downloaded = message
            .file_unique_ref
            .as_ref()
            .and_then(|unique_ref| images.get(unique_ref));
        match (message.kind, downloaded) {
            (MessageKind::Photo, Some(bytes)) => {
                if !block.is_empty() {
                    parts.push(ContentPart::Text(block.trim().to_string()));
                    block = String::new();
                }
                image_counter += 1;
                parts.push(ContentPart::Text(
                    log_entry(message, Some(image_counter)).trim().to_string(),
                ));
                parts.push(ContentPart::Image {
                    mime_type: "image/jpeg".to_string(),
                    data: bytes.clone(),
                });
            }
            _ => block.push_str(&log_entry(message, None)),
        }
    }

    if !block.is_empty() {
        parts.push(ContentPart::Text(block.trim().to_string()));
    }

    parts.push(ContentPart::Text(closing(personality)));

    // Only the preamble and the closing: nothing to narrate.
    if parts.len() <= 2 {
        return None;
    }

    Some(parts)
}
