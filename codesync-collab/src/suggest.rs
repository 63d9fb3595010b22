//! Stateless autocomplete hints.
//!
//! A pattern matcher over the text left of the cursor. Python gets canned
//! completions for the common keywords; anything else gets a generic
//! hint. No state, no I/O — the HTTP layer in front of this crate exposes
//! it as its autocomplete endpoint.

/// Suggest a completion for `code` at `cursor`.
///
/// `cursor` is a character offset, which is how the editor frontends
/// count positions; offsets past the end just mean "all of it".
pub fn suggest(code: &str, cursor: usize, language: &str) -> String {
    if !language.eq_ignore_ascii_case("python") {
        return "// suggestion: keep typing".to_string();
    }

    let left: String = code.chars().take(cursor).collect();
    let last = left.split_whitespace().last().unwrap_or("");
    let trimmed = left.trim();

    if last.starts_with("imp") {
        "ort os\n\nos.listdir('.')\n".to_string()
    } else if last.starts_with("from") {
        " module import something\n".to_string()
    } else if last == "def" {
        " function_name(param1, param2):\n    \"\"\"Function description\"\"\"\n    pass\n"
            .to_string()
    } else if trimmed.ends_with("def") {
        " function_name():\n    pass\n".to_string()
    } else if last == "class" {
        " ClassName:\n    def __init__(self):\n        pass\n".to_string()
    } else if trimmed.ends_with("if") {
        // "elif" ends with "if" too and wants the same completion.
        " condition:\n    pass\n".to_string()
    } else if trimmed.ends_with("else") {
        ":\n    pass\n".to_string()
    } else if last == "for" {
        " i in range(0, 10):\n    print(i)\n".to_string()
    } else if last == "while" {
        " condition:\n    break\n".to_string()
    } else if last.starts_with("pri") {
        "nt(\"Hello World\")\n".to_string()
    } else if last == "=" {
        " 0  # default value\n".to_string()
    } else if last == "[" {
        "]  # list\n".to_string()
    } else if last == "{" {
        "}  # dict\n".to_string()
    } else {
        // Line-level hint: echo the current line back.
        let last_line = match left.rfind('\n') {
            Some(i) => &left[i + 1..],
            None => left.as_str(),
        };
        format!("{last_line}  # hint").trim().to_string()
    }
}
