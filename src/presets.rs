//! Static preset tables: output styles, composition layouts and the model registry.

use serde::Serialize;

/// Marker that separates a style's shared preamble from its art-direction clause.
pub const STYLE_CLAUSE_MARKER: &str = "The specific art style is:";

const BASE_INSTRUCTION: &str = "You are an expert graphic designer creating a 16:9 YouTube thumbnail. The final image must be professional, high-resolution, and visually compelling. Key requirements are: 1) A clear, engaging subject. 2) Large, bold, and easily readable text that is a core part of the design. 3) A dynamic composition that draws the viewer's eye. The specific art style is:";

#[derive(Debug, Clone, Serialize)]
pub struct ExamplePrompt {
    pub label: &'static str,
    pub prompt: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct Style {
    pub key: &'static str,
    pub name: &'static str,
    pub emoji: &'static str,
    /// Art direction appended after [`STYLE_CLAUSE_MARKER`].
    #[serde(skip)]
    art_direction: &'static str,
    pub image_output: bool,
    pub examples: &'static [ExamplePrompt],
}

impl Style {
    pub fn system_instruction(&self) -> String {
        format!("{BASE_INSTRUCTION} {}", self.art_direction)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Layout {
    pub key: &'static str,
    pub name: &'static str,
    pub emoji: &'static str,
    pub instruction: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    ImageGeneration,
    ImageEditing,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSpec {
    pub key: &'static str,
    pub name: &'static str,
    pub version: &'static str,
    pub model_string: &'static str,
    pub kind: ModelKind,
}

impl ModelSpec {
    pub fn supports_image_input(&self) -> bool {
        self.kind == ModelKind::ImageEditing
    }
}

pub static STYLES: &[Style] = &[
    Style {
        key: "anime",
        name: "Tech Anime",
        emoji: "👾",
        art_direction: "a modern tech-anime style. The central focus is a charismatic anime-style character with clean, sharp lines, like vector art, typically positioned on the right side of the frame. The background is dark (deep blue, purple, or black) and features abstract digital patterns, circuits, or futuristic elements. The scene is illuminated by vibrant neon lights, primarily in shades of cyan and magenta, which also create strong rim lighting on the character. The text uses a bold, sans-serif font, often stacked, and is colored with the same vibrant neon palette to ensure it stands out dramatically.",
        image_output: true,
        examples: &[
            ExamplePrompt { label: "AI for Business", prompt: "An anime-style business professional in a suit, with a glowing brain icon next to them. Text: \"AI FOR BUSINESS LEADERS\"" },
            ExamplePrompt { label: "Cybersecurity Guide", prompt: "An anime-style hacker character in a hoodie, with lines of code in the background. Text: \"BEST SECURITY PRACTICES\"" },
            ExamplePrompt { label: "Coding Livestream", prompt: "An anime character with headphones coding on a futuristic computer. Neon lights reflect in their glasses. Text: \"VIBECODING LIVE\"" },
        ],
    },
    Style {
        key: "cinematic",
        name: "Cinematic",
        emoji: "🎬",
        art_direction: "hyper-realistic and cinematic. Emulate the look of a blockbuster film with dramatic, moody lighting and deep shadows. Apply professional color grading for a specific emotional tone (e.g., cool blues for sci-fi, warm tones for adventure). The composition should be dynamic, using rule of thirds, with a clear focal point. Text is integrated seamlessly into the scene.",
        image_output: true,
        examples: &[
            ExamplePrompt { label: "Space Documentary", prompt: "A stunning photorealistic nebula with a futuristic spaceship flying through it. Text: \"The Final Frontier\"" },
            ExamplePrompt { label: "Travel Vlog", prompt: "A lone hiker watching a majestic, photorealistic sunset over mountains. Text: \"My Greatest Adventure\"" },
        ],
    },
    Style {
        key: "minimalist",
        name: "Minimalist",
        emoji: "✨",
        art_direction: "clean, modern, and minimalist. A single, bold subject against a simple, solid-colored or subtle gradient background. Emphasize negative space to create a sense of calm and focus. Typography is the hero: elegant, sans-serif, and perfectly kerned. The aesthetic is sophisticated and uncluttered.",
        image_output: true,
        examples: &[
            ExamplePrompt { label: "Tech Review", prompt: "A sleek, modern smartphone on a plain colored background. Text: \"The Perfect Phone?\"" },
            ExamplePrompt { label: "Productivity Tips", prompt: "A simple line drawing of a brain with a lightbulb. Text: \"10x Your Focus\"" },
        ],
    },
    Style {
        key: "bold_typography",
        name: "Bold Typography",
        emoji: "📝",
        art_direction: "typography-focused. The text is the hero. Use a massive, bold, eye-catching font that fills most of the frame. The background is a simple but high-contrast texture, gradient, or solid color that makes the text pop. There is no imagery, only text and background elements. The design is high-contrast and impossible to ignore.",
        image_output: true,
        examples: &[
            ExamplePrompt { label: "Motivational", prompt: "A bright yellow background with the text \"GET IT DONE\" in massive black letters." },
            ExamplePrompt { label: "News Update", prompt: "A red background with white text \"BREAKING NEWS\" in a bold, sans-serif font." },
        ],
    },
    Style {
        key: "vibrant",
        name: "Vibrant",
        emoji: "🌈",
        art_direction: "energetic and vibrant. The image explodes with saturated, bright colors. The composition is dynamic with a sense of motion or excitement, using diagonal lines and overlapping elements. The imagery is fun and attention-grabbing. Text is playful, possibly with outlines or glow effects to stand out from the busy background.",
        image_output: true,
        examples: &[
            ExamplePrompt { label: "Gaming Video", prompt: "An explosive scene from a video game with bright colors and neon effects. Text: \"INSANE VICTORY!\"" },
            ExamplePrompt { label: "Food Challenge", prompt: "A person with an exaggerated happy expression eating a giant, colorful dessert. Text: \"CRAZIEST DESSERT EVER\"" },
        ],
    },
];

pub static LAYOUTS: &[Layout] = &[
    Layout { key: "subject-left-text-right", name: "Subject Left, Text Right", emoji: "👤|📝", instruction: "The main subject should be on the left side of the image, and the text should be on the right side." },
    Layout { key: "subject-right-text-left", name: "Subject Right, Text Left", emoji: "📝|👤", instruction: "The main subject should be on the right side of the image, and the text should be on the left side." },
    Layout { key: "text-top-subject-bottom", name: "Text Top, Subject Bottom", emoji: "📝/👤", instruction: "The text should be in the top half of the image, and the main subject should be in the bottom half." },
    Layout { key: "subject-top-text-bottom", name: "Subject Top, Text Bottom", emoji: "👤/📝", instruction: "The main subject should be in the top half of the image, and the text should be in the bottom half." },
    Layout { key: "text-center", name: "Text Centered", emoji: "🎯", instruction: "The text should be the main focus, centered in the image. Any subject should be secondary or in the background." },
    Layout { key: "no-preference", name: "No Preference", emoji: "🤷", instruction: "" },
];

pub static MODELS: &[ModelSpec] = &[
    ModelSpec { key: "imagen_4", name: "Imagen 4.0", version: "4.0", model_string: "imagen-4.0-generate-001", kind: ModelKind::ImageGeneration },
    ModelSpec { key: "gemini_image_editor", name: "Gemini Image Editor", version: "2.5 Flash", model_string: "gemini-2.5-flash-image-preview", kind: ModelKind::ImageEditing },
];

pub const DEFAULT_LAYOUT: &str = "no-preference";

pub fn style(key: &str) -> Option<&'static Style> {
    STYLES.iter().find(|s| s.key == key)
}

pub fn layout(key: &str) -> Option<&'static Layout> {
    LAYOUTS.iter().find(|l| l.key == key)
}

pub fn model(key: &str) -> Option<&'static ModelSpec> {
    MODELS.iter().find(|m| m.key == key)
}

/// The model that accepts a source image. The registry carries exactly one.
pub fn image_editing_model() -> &'static ModelSpec {
    MODELS
        .iter()
        .find(|m| m.supports_image_input())
        .unwrap_or(&MODELS[MODELS.len() - 1])
}

pub fn default_style() -> &'static Style {
    &STYLES[0]
}

pub fn default_model() -> &'static ModelSpec {
    &MODELS[0]
}

/// Resolves a model key to the provider's model identifier, passing unknown keys through.
pub fn model_string(key: &str) -> String {
    model(key).map(|m| m.model_string.to_string()).unwrap_or_else(|| key.to_string())
}

#[derive(Debug, Serialize)]
pub struct PresetCatalog {
    pub styles: &'static [Style],
    pub layouts: &'static [Layout],
    pub models: &'static [ModelSpec],
}

pub fn catalog() -> PresetCatalog {
    PresetCatalog { styles: STYLES, layouts: LAYOUTS, models: MODELS }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_style_instruction_carries_the_art_direction_marker() {
        for style in STYLES {
            assert!(style.system_instruction().contains(STYLE_CLAUSE_MARKER), "{}", style.key);
        }
    }

    #[test]
    fn registry_has_a_single_image_editing_model() {
        let editors: Vec<_> = MODELS.iter().filter(|m| m.supports_image_input()).collect();
        assert_eq!(editors.len(), 1);
        assert_eq!(image_editing_model().key, "gemini_image_editor");
        assert!(!default_model().supports_image_input());
    }

    #[test]
    fn unknown_model_keys_pass_through() {
        assert_eq!(model_string("imagen_4"), "imagen-4.0-generate-001");
        assert_eq!(model_string("custom-model"), "custom-model");
        assert!(layout(DEFAULT_LAYOUT).is_some_and(|l| l.instruction.is_empty()));
    }
}
