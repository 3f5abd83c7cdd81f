//! Turns style, layout and uploaded-image settings into the prompt text sent to the model.

use crate::presets::{self, STYLE_CLAUSE_MARKER};

const FALLBACK_ART_DIRECTION: &str = "a modern, high-impact style.";

const IMAGE_EDITING_INSTRUCTION: &str = "You are a world-class photo editor and YouTube thumbnail designer. Your primary task is to use the person from the user-provided image to create a new, professional 16:9 YouTube thumbnail.

**CRITICAL INSTRUCTIONS (MUST be followed):**
1.  **USE THE PROVIDED PERSON:** You MUST identify and perfectly extract the main person from the provided image. DO NOT generate a new person or character. The person in the original photo is the star of the thumbnail.
2.  **CREATE A NEW SCENE:** Discard the original background completely. Create a new, dynamic, and professional background that fits the requested style.
3.  **COMPOSITE AND DESIGN:** Place the extracted person onto the new background. Add the requested text in a large, bold, and highly readable font. The final composition must be a compelling 16:9 landscape thumbnail.
4.  **FINAL ASPECT RATIO:** The final output image MUST be in a 16:9 landscape aspect ratio.

The specific art style for the new background and overall feel is:";

/// Resolves the system instruction for a style, switching to the image-editing template when a
/// source image is attached. Unknown styles fall back to the default style.
pub fn system_instruction(style_key: &str, has_source_image: bool) -> String {
    let style = presets::style(style_key).unwrap_or_else(presets::default_style);
    let instruction = style.system_instruction();
    if !has_source_image {
        return instruction;
    }
    format!("{IMAGE_EDITING_INSTRUCTION} {}", art_direction(&instruction))
}

/// The part of a style instruction after the art-direction marker.
fn art_direction(instruction: &str) -> &str {
    match instruction.find(STYLE_CLAUSE_MARKER) {
        Some(idx) => instruction[idx + STYLE_CLAUSE_MARKER.len()..].trim(),
        None => FALLBACK_ART_DIRECTION,
    }
}

/// Layout clause for a layout key, `None` when the layout is unknown or has no instruction.
pub fn layout_instruction(layout_key: Option<&str>) -> Option<&'static str> {
    layout_key
        .and_then(presets::layout)
        .map(|l| l.instruction)
        .filter(|i| !i.is_empty())
}

pub fn full_prompt(system_instruction: &str, layout_instruction: Option<&str>, prompt: &str) -> String {
    match layout_instruction {
        Some(layout) => format!("{system_instruction}\n\nLayout instruction: {layout}\n\n{prompt}"),
        None => format!("{system_instruction}\n\n{prompt}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_style_instruction_without_image() {
        let instruction = system_instruction("cinematic", false);
        assert!(instruction.starts_with("You are an expert graphic designer"));
        assert!(instruction.ends_with("Text is integrated seamlessly into the scene."));
    }

    #[test]
    fn image_upload_reframes_as_editing_and_keeps_art_direction() {
        let instruction = system_instruction("minimalist", true);
        assert!(instruction.starts_with("You are a world-class photo editor"));
        assert!(instruction.ends_with(
            "overall feel is: clean, modern, and minimalist. A single, bold subject against a simple, solid-colored or subtle gradient background. Emphasize negative space to create a sense of calm and focus. Typography is the hero: elegant, sans-serif, and perfectly kerned. The aesthetic is sophisticated and uncluttered."
        ));
        assert!(!instruction.contains("expert graphic designer"));
    }

    #[test]
    fn missing_marker_falls_back_to_generic_direction() {
        assert_eq!(art_direction("no marker here"), FALLBACK_ART_DIRECTION);
    }

    #[test]
    fn full_prompt_includes_layout_clause_only_when_defined() {
        let layout = layout_instruction(Some("text-center"));
        assert_eq!(
            full_prompt("SYS", layout, "A red car"),
            "SYS\n\nLayout instruction: The text should be the main focus, centered in the image. Any subject should be secondary or in the background.\n\nA red car"
        );
        assert_eq!(layout_instruction(Some("no-preference")), None);
        assert_eq!(layout_instruction(None), None);
        assert_eq!(full_prompt("SYS", None, "A red car"), "SYS\n\nA red car");
    }
}
