//! Terminal file prompt
//!
//! The dialog is a single question on the controlling terminal. stdin and
//! stdout belong to the host channel, so the terminal device is opened
//! directly.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Answer typed in save mode to accept the proposed file name
const ACCEPT_DEFAULT: &str = ".";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenKind {
    Save,
    Load,
    LoadMultiple,
}

impl OpenKind {
    pub fn parse(keyword: &str) -> Option<Self> {
        match keyword {
            "save" => Some(OpenKind::Save),
            "load" => Some(OpenKind::Load),
            "load_multiple" => Some(OpenKind::LoadMultiple),
            _ => None,
        }
    }
}

/// Parameters of one `open` request
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub kind: OpenKind,
    pub filter: String,
    pub default: Option<String>,
    pub folder: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Canceled,
    Done(Vec<String>),
}

/// Dictionary key describing a filter keyword
fn filter_label_key(filter: &str) -> Option<&'static str> {
    Some(match filter {
        "all" => "all_files",
        "wav" | "ogg" => "sound_files",
        "anim" | "animatn" => "animation_files",
        "image" | "png" | "jpeg" => "image_files",
        "tga" => "targa_image_files",
        "bmp" => "bitmap_image_files",
        "avi" => "avi_movie_file",
        "xml" => "xml_file",
        "raw" => "raw_file",
        "j2c" => "compressed_image_files",
        "directory" => "choose_the_directory",
        _ => return None,
    })
}

fn translate<'a>(dictionary: &'a HashMap<String, String>, key: &'a str) -> &'a str {
    dictionary.get(key).map(String::as_str).unwrap_or(key)
}

/// The question shown to the user
pub fn prompt_text(request: &OpenRequest, dictionary: &HashMap<String, String>) -> String {
    let verb = match request.kind {
        OpenKind::Save => translate(dictionary, "save_file_verb"),
        OpenKind::Load if request.filter == "directory" => {
            translate(dictionary, "choose_the_directory")
        }
        OpenKind::Load => translate(dictionary, "load_file_verb"),
        OpenKind::LoadMultiple => translate(dictionary, "load_files"),
    };
    let label = filter_label_key(&request.filter)
        .map(|key| translate(dictionary, key))
        .unwrap_or(&request.filter);

    let mut text = format!("{} ({}) in {}", verb, label, request.folder.display());
    if let Some(default) = request.default.as_deref().filter(|d| !d.is_empty()) {
        text.push_str(&format!(" ['{}' for {}]", ACCEPT_DEFAULT, default));
    }
    text.push_str(": ");
    text
}

fn resolve(folder: &Path, entry: &str) -> String {
    let path = Path::new(entry);
    if path.is_absolute() {
        path.display().to_string()
    } else {
        folder.join(path).display().to_string()
    }
}

/// Turn a typed line into an answer. An empty line cancels.
pub fn parse_answer(line: &str, request: &OpenRequest) -> Answer {
    let line = line.trim();
    if line.is_empty() {
        return Answer::Canceled;
    }
    match request.kind {
        OpenKind::LoadMultiple => {
            let entries = line.split_whitespace();
            Answer::Done(entries.map(|entry| resolve(&request.folder, entry)).collect())
        }
        OpenKind::Save if line == ACCEPT_DEFAULT => match request.default.as_deref() {
            Some(default) if !default.is_empty() => {
                Answer::Done(vec![resolve(&request.folder, default)])
            }
            _ => Answer::Canceled,
        },
        OpenKind::Save | OpenKind::Load => Answer::Done(vec![resolve(&request.folder, line)]),
    }
}

#[cfg(unix)]
fn open_terminal() -> io::Result<(File, File)> {
    let tty = OpenOptions::new().read(true).write(true).open("/dev/tty")?;
    let output = tty.try_clone()?;
    Ok((tty, output))
}

#[cfg(windows)]
fn open_terminal() -> io::Result<(File, File)> {
    let input = OpenOptions::new().read(true).write(true).open("CONIN$")?;
    let output = OpenOptions::new().read(true).write(true).open("CONOUT$")?;
    Ok((input, output))
}

/// Ask the user on the terminal. Blocks until a line is entered.
pub fn ask(request: &OpenRequest, dictionary: &HashMap<String, String>) -> io::Result<Answer> {
    let (input, mut output) = open_terminal()?;
    output.write_all(prompt_text(request, dictionary).as_bytes())?;
    output.flush()?;

    let mut line = String::new();
    if BufReader::new(input).read_line(&mut line)? == 0 {
        return Ok(Answer::Canceled);
    }
    Ok(parse_answer(&line, request))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: OpenKind, default: Option<&str>) -> OpenRequest {
        OpenRequest {
            kind,
            filter: "png".to_string(),
            default: default.map(String::from),
            folder: PathBuf::from("/tmp/shots"),
        }
    }

    #[test]
    fn test_empty_answer_cancels() {
        assert_eq!(parse_answer("  \n", &request(OpenKind::Load, None)), Answer::Canceled);
    }

    #[test]
    fn test_relative_answers_use_folder() {
        assert_eq!(
            parse_answer("a.png\n", &request(OpenKind::Load, None)),
            Answer::Done(vec!["/tmp/shots/a.png".to_string()])
        );
        assert_eq!(
            parse_answer("/abs/b.png", &request(OpenKind::Load, None)),
            Answer::Done(vec!["/abs/b.png".to_string()])
        );
    }

    #[test]
    fn test_multiple_answers() {
        assert_eq!(
            parse_answer("a.png  /x/b.png", &request(OpenKind::LoadMultiple, None)),
            Answer::Done(vec!["/tmp/shots/a.png".to_string(), "/x/b.png".to_string()])
        );
    }

    #[test]
    fn test_save_accepts_proposed_name() {
        let save = request(OpenKind::Save, Some("img_003.png"));
        assert_eq!(
            parse_answer(".", &save),
            Answer::Done(vec!["/tmp/shots/img_003.png".to_string()])
        );
        assert!(prompt_text(&save, &HashMap::new()).contains("img_003.png"));
    }

    #[test]
    fn test_prompt_uses_dictionary() {
        let mut dictionary = HashMap::new();
        dictionary.insert("load_file_verb".to_string(), "Laden".to_string());
        dictionary.insert("image_files".to_string(), "Bilder".to_string());

        let text = prompt_text(&request(OpenKind::Load, None), &dictionary);
        assert_eq!(text, "Laden (Bilder) in /tmp/shots: ");
    }
}
