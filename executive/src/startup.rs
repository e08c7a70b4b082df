use {
    crate::{AppExecutive, SubsystemCleanup},
    corvus_exec_runtime::{
        config::{ResetType, STARTUP_MIN_TOKENS, STARTUP_RECORD_SIZE},
        events::EventSink,
        osal::{OsServices, OsStatus},
        records::ExceptionAction,
    },
    log::{info, warn},
};

/// One parsed startup-script directive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum ScriptEntry {
    App {
        file_name: String,
        entry_point: String,
        name: String,
        priority: u8,
        stack_size: u32,
        exception_action: ExceptionAction,
    },
    Lib {
        file_name: String,
        entry_point: String,
        name: String,
    },
}

/// Unsigned parse with base auto-detection (`0x` hex, leading `0` octal,
/// decimal otherwise). The first byte that is not a digit of the detected
/// base ends the number; whatever follows is dropped without comment.
/// Startup scripts are hand-written, and a stray suffix should not keep
/// an app on the ground.
fn parse_unsigned(token: &str) -> u32 {
    let (digits, radix) = if let Some(hex) = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        (hex, 16)
    } else if token.len() > 1 && token.starts_with('0') {
        (&token[1..], 8)
    } else {
        (token, 10)
    };
    let mut value: u32 = 0;
    for c in digits.chars() {
        match c.to_digit(radix) {
            Some(digit) => value = value.saturating_mul(radix).saturating_add(digit),
            None => break,
        }
    }
    value
}

fn entry_from_tokens(tokens: &[String]) -> Option<ScriptEntry> {
    if tokens.len() < STARTUP_MIN_TOKENS {
        warn!(
            "startup: record starting {:?} has {} fields, need {}; skipped",
            tokens.first().map(String::as_str).unwrap_or(""),
            tokens.len(),
            STARTUP_MIN_TOKENS
        );
        return None;
    }
    match tokens[0].as_str() {
        "CFE_APP" => Some(ScriptEntry::App {
            file_name: tokens[1].clone(),
            entry_point: tokens[2].clone(),
            name: tokens[3].clone(),
            priority: parse_unsigned(&tokens[4]).min(u8::MAX as u32) as u8,
            stack_size: parse_unsigned(&tokens[5]),
            // tokens[6] is reserved
            exception_action: ExceptionAction::from_raw_clamped(parse_unsigned(&tokens[7])),
        }),
        "CFE_LIB" => Some(ScriptEntry::Lib {
            file_name: tokens[1].clone(),
            entry_point: tokens[2].clone(),
            name: tokens[3].clone(),
        }),
        other => {
            warn!("startup: unrecognized entry type {}; skipped", other);
            None
        }
    }
}

/// Tokenizes the startup script. Records end at `;`, tokens at `,`,
/// whitespace (any byte ≤ 0x20) is ignored everywhere, and a `!` ends the
/// file. A record that accumulates `STARTUP_RECORD_SIZE` bytes is dropped
/// at its terminator and parsing resumes with the next record.
pub(crate) fn parse_script(bytes: &[u8]) -> Vec<ScriptEntry> {
    let mut entries = Vec::new();
    let mut tokens: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut record_len = 0usize;
    let mut too_long = false;

    for &byte in bytes {
        if byte == b'!' {
            break;
        }
        if byte <= 0x20 {
            continue;
        }
        record_len += 1;
        if record_len >= STARTUP_RECORD_SIZE {
            too_long = true;
        }
        match byte {
            b',' => {
                if !too_long {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            b';' => {
                if too_long {
                    warn!(
                        "startup: dropping record over {} bytes",
                        STARTUP_RECORD_SIZE
                    );
                } else {
                    tokens.push(std::mem::take(&mut current));
                    if let Some(entry) = entry_from_tokens(&tokens) {
                        entries.push(entry);
                    }
                }
                tokens.clear();
                current.clear();
                record_len = 0;
                too_long = false;
            }
            _ => {
                if !too_long {
                    current.push(byte as char);
                }
            }
        }
    }
    entries
}

impl<OS, EV, HK> AppExecutive<OS, EV, HK>
where
    OS: OsServices,
    EV: EventSink,
    HK: SubsystemCleanup,
{
    /// Reads and executes the startup script for the given reset type.
    ///
    /// A processor reset tries the volatile path first, so a script
    /// staged in RAM survives the reset and takes precedence; a power-on
    /// reset (or a volatile open failure) uses the non-volatile script.
    /// Individual records that fail to start are logged and skipped.
    /// Returns the number of applications and libraries started.
    pub fn process_startup_script(&self, reset: ResetType) -> u32 {
        let script = match reset {
            ResetType::Processor => self
                .read_script(&self.options().volatile_startup_path)
                .or_else(|status| {
                    self.events().write_syslog(&format!(
                        "startup: volatile script unavailable ({}), using non-volatile",
                        status
                    ));
                    self.read_script(&self.options().nonvolatile_startup_path)
                }),
            ResetType::PowerOn => self.read_script(&self.options().nonvolatile_startup_path),
        };
        let bytes = match script {
            Ok(bytes) => bytes,
            Err(status) => {
                self.events().write_syslog(&format!(
                    "startup: no startup script could be opened: {}",
                    status
                ));
                return 0;
            }
        };

        let mut started = 0;
        for entry in parse_script(&bytes) {
            match entry {
                ScriptEntry::App {
                    file_name,
                    entry_point,
                    name,
                    priority,
                    stack_size,
                    exception_action,
                } => match self.app_create(
                    &file_name,
                    &entry_point,
                    &name,
                    priority,
                    stack_size,
                    exception_action,
                ) {
                    Ok(_) => started += 1,
                    Err(err) => warn!("startup: could not start {}: {}", name, err),
                },
                ScriptEntry::Lib {
                    file_name,
                    entry_point,
                    name,
                } => match self.load_library(Some(&file_name), Some(&entry_point), &name) {
                    Ok(_) => started += 1,
                    Err(err) => warn!("startup: could not load library {}: {}", name, err),
                },
            }
        }
        info!("startup script processed, {} entries started", started);
        started
    }

    fn read_script(&self, path: &str) -> Result<Vec<u8>, OsStatus> {
        let file = self.os().file_open(path)?;
        let mut contents = Vec::new();
        let mut buf = [0u8; 128];
        loop {
            match self.os().file_read(file, &mut buf) {
                Ok(0) => break,
                Ok(n) => contents.extend_from_slice(&buf[..n]),
                Err(status) => {
                    let _ = self.os().file_close(file);
                    return Err(status);
                }
            }
        }
        let _ = self.os().file_close(file);
        Ok(contents)
    }
}
