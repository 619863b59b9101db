// crates/core/src/generation/prompt.rs
//! Manim prompt material and post-processing of model output.

/// System instruction sent with every Manim generation request.
pub const MANIM_SYSTEM_INSTRUCTION: &str = "\
You are a world-class expert in Manim, a Python library for mathematical animations.
Your sole purpose is to generate clean, complete, and directly runnable Python code for Manim animations based on a user's prompt.

**CRITICAL OUTPUT RULES:**
1.  **CODE ONLY:** You will only return Python code. Nothing else.
2.  **NO CONVERSATION:** Do not provide any explanation, introduction, or concluding remarks.
3.  **NO MARKDOWN:** Do not wrap the code in markdown fences like ```python or ```.
4.  **COMPLETE SCRIPT:** The code must be a complete, runnable script that includes 'from manim import *'.
5.  **CLASS STRUCTURE:** The code must define a single class that inherits from a Manim Scene (e.g., 'class MyAnimation(Scene):'). The class name should be descriptive and in PascalCase.
6.  **CONSTRUCT METHOD:** The class must implement the 'construct(self)' method where the animation logic resides.
7.  **VALID MANIM:** All code within 'construct' must use valid Manim methods and objects.
";

/// User half of the few-shot exchange.
pub const FEW_SHOT_PROMPT: &str =
    "Create an animation of a blue circle transforming into a red square.";

/// Model half of the few-shot exchange.
pub const FEW_SHOT_RESPONSE: &str = "\
from manim import *

class CircleToSquare(Scene):
    def construct(self):
        circle = Circle(color=BLUE)
        circle.set_fill(BLUE, opacity=0.5)
        square = Square(color=RED)
        square.set_fill(RED, opacity=0.5)

        self.play(Create(circle))
        self.wait(1)
        self.play(Transform(circle, square))
        self.wait(1)
        self.play(FadeOut(circle))
";

/// Strip a surrounding markdown code fence (with an optional language tag)
/// from generated code. Text without a complete fence is only trimmed.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(inner) = trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
    else {
        return trimmed.to_string();
    };

    // A bare tag like `python` or `py` may sit on the opening line.
    let body = match inner.split_once('\n') {
        Some((first, rest)) if is_language_tag(first.trim()) => rest,
        _ => inner,
    };
    body.trim().to_string()
}

fn is_language_tag(s: &str) -> bool {
    s.is_empty()
        || s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-'))
}
