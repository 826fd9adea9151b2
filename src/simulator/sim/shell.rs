use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::simulator::error::SimError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  Step(u32), // Step N cycles
  Print,
  Continue,
  Quit,
}

const HELP: &str = "Use Enter to step, 'si 100' to step N cycles, 'p' to print state, 'c' to continue, 'q' to quit";

/// Parse one line typed at the step prompt.
pub fn parse_command(line: &str) -> Result<Command, String> {
  let trimmed = line.trim();
  match trimmed {
    "" => return Ok(Command::Step(1)),
    "q" => return Ok(Command::Quit),
    "c" => return Ok(Command::Continue),
    "p" => return Ok(Command::Print),
    _ => {},
  }

  if let Some(num_str) = trimmed.strip_prefix("si") {
    let num_str = num_str.trim();
    if num_str.is_empty() {
      return Err("'si' requires a number, e.g., 'si 100'".to_string());
    }
    return match num_str.parse::<u32>() {
      Ok(n) if n > 0 => Ok(Command::Step(n)),
      Ok(_) => Err("step count must be greater than 0".to_string()),
      Err(e) => Err(format!("invalid number '{}': {}", num_str, e)),
    };
  }

  Err(format!("unknown command: '{}'. {}", trimmed, HELP))
}

pub struct Shell {
  editor: DefaultEditor,
}

impl Shell {
  pub fn new() -> Result<Self, SimError> {
    Ok(Self {
      editor: DefaultEditor::new()?,
    })
  }

  pub fn read_command(&mut self) -> Result<Command, SimError> {
    loop {
      match self.editor.readline("(convpipe) ") {
        Ok(line) => {
          let trimmed = line.trim();
          if !trimmed.is_empty() {
            let _ = self.editor.add_history_entry(trimmed);
          }
          match parse_command(trimmed) {
            Ok(cmd) => return Ok(cmd),
            Err(msg) => eprintln!("Error: {}", msg),
          }
        },
        // Ctrl-C / Ctrl-D
        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => return Ok(Command::Quit),
        Err(err) => return Err(err.into()),
      }
    }
  }
}
