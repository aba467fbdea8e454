pub const CHAT_SYSTEM_INSTRUCTION: &str = "You are Cognote, a study assistant. Answer the \
user's questions using their notes when notes are provided. If the notes do not cover the \
question, say so and answer from general knowledge. Keep answers clear and concise.";

fn with_custom_instruction(prompt: String, custom_instruction: Option<&str>) -> String {
    match custom_instruction {
        Some(instruction) => format!(
            "{}\n\nAdditional instructions from the user:\n{}",
            prompt, instruction
        ),
        None => prompt,
    }
}

pub fn summary_prompt(source: &str, custom_instruction: Option<&str>) -> String {
    let prompt = format!(
        "Summarize the following text concisely, capturing the main points:\n\n{}",
        source
    );
    with_custom_instruction(prompt, custom_instruction)
}

pub fn flashcards_prompt(source: &str, count: u32, custom_instruction: Option<&str>) -> String {
    let prompt = format!(
        "Generate {count} flashcards from the following text. \
         Respond with only a JSON array of {count} objects, each with a \"front\" string \
         (a question or term) and a \"back\" string (the answer or definition).\n\n\
         Text:\n{source}"
    );
    with_custom_instruction(prompt, custom_instruction)
}

pub fn quiz_prompt(source: &str, count: u32, custom_instruction: Option<&str>) -> String {
    let prompt = format!(
        "Generate a quiz with {count} multiple-choice questions from the following text. \
         Respond with only a JSON array of {count} objects with these keys: \
         \"question\" (string), \"options\" (array of 4 strings), \
         \"answer\" (string, exactly equal to one of the options), \
         \"explanations\" (object mapping each option index as a string, \"0\" to \"3\", \
         to a short explanation of why that option is right or wrong), \
         and \"hint\" (string, a nudge that does not give the answer away).\n\n\
         Text:\n{source}"
    );
    with_custom_instruction(prompt, custom_instruction)
}

/// System instruction for a chat call, with the file's note attached as context.
pub fn chat_system(note: Option<&str>, custom_instruction: Option<&str>) -> String {
    let system = match note {
        Some(note) => format!(
            "{}\n\nContext from user's notes:\n{}",
            CHAT_SYSTEM_INSTRUCTION, note
        ),
        None => CHAT_SYSTEM_INSTRUCTION.to_string(),
    };
    with_custom_instruction(system, custom_instruction)
}
