//! Scripted in-memory engine for tests.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::conversion::{ConversionEngine, Document};
use crate::error::ConversionError;
use crate::model::TargetFormat;

/// Shared record of every engine call, in order.
#[derive(Debug, Clone, Default)]
pub(crate) struct EngineEvents(Arc<Mutex<Vec<String>>>);

impl EngineEvents {
    fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub(crate) fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

/// Engine whose failures are scripted per source file name.
pub(crate) struct ScriptedEngine {
    events: EngineEvents,
    open_locks: HashMap<String, u32>,
    save_locks: HashMap<String, u32>,
    corrupt: HashSet<String>,
    fail_quit: bool,
}

impl ScriptedEngine {
    pub(crate) fn new(events: EngineEvents) -> Self {
        ScriptedEngine {
            events,
            open_locks: HashMap::new(),
            save_locks: HashMap::new(),
            corrupt: HashSet::new(),
            fail_quit: false,
        }
    }

    /// `open` of `name` reports the locked error `times` times, then works.
    pub(crate) fn lock_open(mut self, name: &str, times: u32) -> Self {
        self.open_locks.insert(name.to_string(), times);
        self
    }

    /// `save_as` of `name` reports the locked error `times` times, then works.
    pub(crate) fn lock_save(mut self, name: &str, times: u32) -> Self {
        self.save_locks.insert(name.to_string(), times);
        self
    }

    /// `open` of `name` always fails with an ordinary open error.
    pub(crate) fn corrupt(mut self, name: &str) -> Self {
        self.corrupt.insert(name.to_string());
        self
    }

    pub(crate) fn fail_quit(mut self) -> Self {
        self.fail_quit = true;
        self
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

impl ConversionEngine for ScriptedEngine {
    fn open(&mut self, path: &Path) -> Result<Box<dyn Document>, ConversionError> {
        let name = file_name(path);
        self.events.push(format!("open:{}", name));

        if let Some(remaining) = self.open_locks.get_mut(&name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ConversionError::Locked { message: format!("{} is busy", name) });
            }
        }
        if self.corrupt.contains(&name) {
            return Err(ConversionError::Open {
                path: path.to_path_buf(),
                message: "file is corrupt".to_string(),
            });
        }

        let contents = fs::read(path)?;
        Ok(Box::new(ScriptedDocument {
            events: self.events.clone(),
            name: name.clone(),
            contents,
            save_locks: self.save_locks.remove(&name).unwrap_or(0),
        }))
    }

    fn quit(&mut self) -> Result<(), ConversionError> {
        self.events.push("quit".to_string());
        if self.fail_quit {
            return Err(ConversionError::Quit { message: "engine hung".to_string() });
        }
        Ok(())
    }

    fn process_names(&self) -> Vec<String> {
        vec!["fakecalc".to_string()]
    }
}

struct ScriptedDocument {
    events: EngineEvents,
    name: String,
    contents: Vec<u8>,
    save_locks: u32,
}

impl Document for ScriptedDocument {
    fn save_as(&mut self, path: &Path, format: TargetFormat) -> Result<(), ConversionError> {
        self.events.push(format!("save:{}", self.name));
        if self.save_locks > 0 {
            self.save_locks -= 1;
            return Err(ConversionError::Locked { message: format!("{} is busy", self.name) });
        }
        let mut output = format!("{}:", format.extension()).into_bytes();
        output.extend_from_slice(&self.contents);
        fs::write(path, output)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ConversionError> {
        self.events.push(format!("close:{}", self.name));
        Ok(())
    }
}
