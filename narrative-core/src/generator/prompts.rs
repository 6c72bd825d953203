//! Prompts for scene and choice generation.

use super::{ChoiceContext, SceneContext};
use crate::story::StoryState;

/// System prompt for the storyteller.
pub const STORYTELLER_SYSTEM_PROMPT: &str = r#"You are the narrator of an interactive "choose your own adventure" story.

## Your Role
1. Write vivid, second-person scenes in present tense
2. Keep continuity with the story state you are given
3. Respect the reader's stated genre, tone, and preferences
4. Track anything that matters later (items, flags, locations) in the story state

## Response Style
- Scenes are 2 to 4 short paragraphs
- Never list options for the reader inside a scene; choices are requested separately
- Never break character or mention that you are a model"#;

/// Build the user prompt for the next scene.
pub fn build_scene_prompt(context: &SceneContext<'_>) -> String {
    let previous = match context.previous_choice {
        Some(choice) => match &choice.text {
            Some(text) => format!("The reader chose \"{text}\" (id: {}).", choice.id),
            None => format!("The reader chose option \"{}\".", choice.id),
        },
        None if context.turn <= 1 => "This is the opening scene of the story.".to_string(),
        None => "The reader continues without making an explicit choice.".to_string(),
    };

    let current_scene = context.current_scene.unwrap_or("(none yet)");

    format!(
        r#"## Story
Id: {story_id}
Scene number: {turn}
Previous scene: {current_scene}

## Reader
{reader}

## Story State
{state}

## What Just Happened
{previous}

## Instructions
Write the next scene. Update the story state to reflect anything that changed.

Respond with ONLY a JSON object (no markdown, no text outside the JSON):
{{
  "scene": "The scene text",
  "state_updates": {{"key": "new value", "key_to_forget": null}}
}}

Use an empty object for state_updates if nothing changed."#,
        story_id = context.story_id,
        turn = context.turn,
        reader = context.user_context.describe(),
        state = render_state(context.state),
    )
}

/// Build the user prompt for the next set of choices.
pub fn build_choices_prompt(context: &ChoiceContext<'_>) -> String {
    format!(
        r#"## Story
Id: {story_id}
Current scene: {scene}
Scenes so far: {turn}

## Reader
{reader}

## Story State
{state}

## Instructions
Offer the reader {count} distinct things to do next. Each choice needs a short
snake_case id that is unique within the set and a one-sentence display text.

If the story has reached a natural ending, offer no choices and end it instead.

Respond with ONLY a JSON object (no markdown, no text outside the JSON):
{{
  "ended": false,
  "epilogue": null,
  "choices": [{{"id": "open_the_door", "text": "Open the iron door"}}]
}}

When ending: set "ended" to true, "choices" to [], and put a closing paragraph in "epilogue"."#,
        story_id = context.story_id,
        scene = context.current_scene,
        turn = context.turn,
        count = choice_count(context.max_choices),
        reader = context.user_context.describe(),
        state = render_state(context.state),
    )
}

fn choice_count(max_choices: usize) -> String {
    match max_choices {
        0 | 1 => "exactly 1".to_string(),
        2 => "exactly 2".to_string(),
        max => format!("between 2 and {max}"),
    }
}

fn render_state(state: &StoryState) -> String {
    if state.is_empty() {
        return "{}".to_string();
    }
    serde_json::to_string_pretty(state).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::UserContext;
    use crate::generator::PreviousChoice;
    use serde_json::json;

    #[test]
    fn test_opening_scene_prompt() {
        let state = StoryState::new();
        let ctx = UserContext::default();
        let prompt = build_scene_prompt(&SceneContext {
            story_id: "lighthouse",
            turn: 1,
            state: &state,
            user_context: &ctx,
            current_scene: None,
            previous_choice: None,
        });

        assert!(prompt.contains("opening scene"));
        assert!(prompt.contains("Id: lighthouse"));
        assert!(prompt.contains("\"state_updates\""));
    }

    #[test]
    fn test_scene_prompt_mentions_choice_and_state() {
        let mut state = StoryState::new();
        state.insert("lantern".into(), json!("lit"));
        let ctx = UserContext::default();
        let choice = PreviousChoice {
            id: "climb".into(),
            text: Some("Climb the spiral stairs".into()),
        };
        let prompt = build_scene_prompt(&SceneContext {
            story_id: "lighthouse",
            turn: 3,
            state: &state,
            user_context: &ctx,
            current_scene: Some("scene_2"),
            previous_choice: Some(&choice),
        });

        assert!(prompt.contains("Climb the spiral stairs"));
        assert!(prompt.contains("\"lantern\": \"lit\""));
        assert!(prompt.contains("Previous scene: scene_2"));
    }

    #[test]
    fn test_choices_prompt_includes_cap() {
        let state = StoryState::new();
        let ctx = UserContext::default();
        let prompt = build_choices_prompt(&ChoiceContext {
            story_id: "lighthouse",
            current_scene: "scene_2",
            turn: 2,
            state: &state,
            user_context: &ctx,
            max_choices: 5,
        });

        assert!(prompt.contains("between 2 and 5"));
        assert_eq!(choice_count(1), "exactly 1");
        assert!(prompt.contains("Current scene: scene_2"));
    }
}
