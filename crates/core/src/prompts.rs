pub static UNDERSTAND_PROMPT: &str = r#"
  You are an educational video analyst. Watch the attached video carefully.

  TASK:
  1. Produce a faithful transcript of everything spoken
  2. Name the main topic in a few words
  3. State the learning objective: what a viewer should be able to do afterwards
  4. List the important moments with their timestamps

  OUTPUT: Return ONLY valid JSON:
  {
    "transcript": "Full transcript text",
    "topic": "Main topic",
    "learning_objective": "One sentence learning objective",
    "important_moments": [
      { "timestamp": "MM:SS", "description": "What happens", "type": "definition|example|demonstration|summary|other" }
    ]
  }
"#;

pub fn summarize_prompt(topic: &str, objective: &str, transcript: &str) -> String {
    format!(
        r#"You are summarizing an educational video.

  Topic: {topic}
  Learning objective: {objective}

  Transcript:
  {transcript}

  OUTPUT: Return ONLY valid JSON:
  {{
    "summary": "A thorough 2-3 paragraph summary",
    "tldr": "One or two sentence TL;DR"
  }}"#
    )
}

pub fn key_points_prompt(topic: &str, transcript: &str) -> String {
    format!(
        r#"Extract the key learning points from this video about "{topic}".

  Transcript:
  {transcript}

  OUTPUT: Return ONLY a valid JSON array of 5-10 items:
  [
    {{ "point": "Short statement", "explanation": "Why it matters", "timestamp": "MM:SS or null", "importance": 1-5 }}
  ]"#
    )
}

pub fn quiz_prompt(topic: &str, transcript: &str) -> String {
    format!(
        r#"Write a multiple-choice quiz for a video about "{topic}".

  Transcript:
  {transcript}

  RULES:
  - Exactly 5 questions
  - Exactly 4 options per question
  - correct_answer is the 0-based index of the right option

  OUTPUT: Return ONLY a valid JSON array:
  [
    {{ "question": "...", "options": ["a", "b", "c", "d"], "correct_answer": 0, "explanation": "...", "timestamp": "MM:SS or null" }}
  ]"#
    )
}

pub fn flash_cards_prompt(topic: &str, transcript: &str) -> String {
    format!(
        r#"Create study flash cards for a video about "{topic}".

  Transcript:
  {transcript}

  OUTPUT: Return ONLY a valid JSON array of 8-12 cards:
  [
    {{ "front": "Question or term", "back": "Answer or definition", "category": "definition|concept|fact|process" }}
  ]"#
    )
}

pub fn concepts_prompt(topic: &str, transcript: &str) -> String {
    format!(
        r#"List the recurring concepts and terminology in this video about "{topic}".

  Transcript:
  {transcript}

  RULES:
  - Use the canonical name of each concept, in Title Case
  - frequency is how many times the concept comes up
  - context is one sentence on how the video uses it

  OUTPUT: Return ONLY a valid JSON array:
  [
    {{ "name": "Concept", "frequency": 3, "context": "..." }}
  ]"#
    )
}

pub fn translate_prompt(language: &str, transcript: &str, summary: &str) -> String {
    format!(
        r#"Translate the following transcript and summary into {language}.
  Keep technical terms accurate. Do not add commentary.

  Transcript:
  {transcript}

  Summary:
  {summary}

  OUTPUT: Return ONLY valid JSON:
  {{
    "transcript": "translated transcript",
    "summary": "translated summary"
  }}"#
    )
}
