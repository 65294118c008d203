//! Script-backtrace extraction.
//!
//! Script engines report stacks as text lines; the loader converts them into
//! `(message, file, line)` tuples for evaluation errors. Two line shapes are
//! recognized: `name@file:line` and `at name (file:line[:column])`.

/// One frame of a script backtrace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFrame {
    pub function: String,
    pub file: String,
    pub line: u32,
}

/// Parses one stack line; returns `None` for unrecognized shapes.
pub fn parse_stack_line(line: &str) -> Option<StackFrame> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("at ") {
        // "at name (file:line[:column])"
        let open = rest.find('(')?;
        let close = rest.rfind(')')?;
        let function = rest[..open].trim().to_string();
        let (file, line) = split_file_line(&rest[open + 1..close])?;
        return Some(StackFrame {
            function,
            file,
            line,
        });
    }
    // "name@file:line"
    let at = line.find('@')?;
    let (file, line_no) = split_file_line(&line[at + 1..])?;
    Some(StackFrame {
        function: line[..at].to_string(),
        file,
        line: line_no,
    })
}

fn split_file_line(s: &str) -> Option<(String, u32)> {
    // The file part may itself contain ':' (drive letters), so parse from
    // the right and tolerate a trailing column.
    let mut parts: Vec<&str> = s.rsplitn(3, ':').collect();
    parts.reverse();
    match parts.as_slice() {
        [file, line, column] => {
            if let Ok(line) = line.parse() {
                if column.parse::<u32>().is_ok() {
                    return Some(((*file).to_string(), line));
                }
            }
            // No numeric column: the last piece was the line.
            let file = format!("{file}:{line}");
            column.parse().ok().map(|l| (file, l))
        }
        [file, line] => line.parse().ok().map(|l| ((*file).to_string(), l)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_at_style() {
        let frame = parse_stack_line("  at configure (/p/probes.keel:12:5)").unwrap();
        assert_eq!(frame.function, "configure");
        assert_eq!(frame.file, "/p/probes.keel");
        assert_eq!(frame.line, 12);
    }

    #[test]
    fn parses_arobase_style() {
        let frame = parse_stack_line("configure@/p/probes.keel:12").unwrap();
        assert_eq!(frame.function, "configure");
        assert_eq!(frame.file, "/p/probes.keel");
        assert_eq!(frame.line, 12);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_stack_line("not a stack line"), None);
        assert_eq!(parse_stack_line("at broken"), None);
    }
}
