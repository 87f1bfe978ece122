/// Cut a rendered stack trace down to the frames of `source_class`.
///
/// Frame lines after the last one belonging to `source_class` (or one of
/// its nested classes) are dropped together with `... N more` markers.
/// Header, message and `Caused by:` lines are kept. A trace without a
/// matching frame comes back unchanged.
pub fn trim_stack_trace(trace: &str, source_class: &str) -> String {
    let lines: Vec<&str> = trace.lines().collect();
    let Some(last) = lines
        .iter()
        .rposition(|line| is_frame_of(line, source_class))
    else {
        return trace.to_string();
    };

    let mut kept: Vec<&str> = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        if index <= last || !(is_frame(line) || is_elision(line)) {
            kept.push(line);
        }
    }
    kept.join("\n")
}

fn is_frame(line: &str) -> bool {
    line.trim_start().starts_with("at ")
}

fn is_elision(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("... ") && line.ends_with(" more")
}

fn is_frame_of(line: &str, class: &str) -> bool {
    line.trim_start()
        .strip_prefix("at ")
        .and_then(|frame| frame.strip_prefix(class))
        .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('$'))
}
