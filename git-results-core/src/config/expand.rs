fn placeholder(name: &str) -> String {
    format!("{{{name}}}")
}

/// Replace `{name}` for every known variable; unknown placeholders are left
/// untouched.
pub(crate) fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&placeholder(name), value);
    }
    out
}

fn cycle_set<'a>(start: &'a str, vars: &'a HashMap<String, String>) -> BTreeSet<&'a str> {
    let mut seen = BTreeSet::new();
    let mut queue = vec![start];
    while let Some(name) = queue.pop() {
        if !seen.insert(name) {
            continue;
        }
        if let Some(value) = vars.get(name) {
            for key in vars.keys() {
                if value.contains(&placeholder(key)) {
                    queue.push(key.as_str());
                }
            }
        }
    }
    seen
}

/// Expand the variable map to a fixed point, bounded by the variable count.
/// A direct self-reference or an indirect cycle is `Invalid`, naming the
/// variables involved.
pub(crate) fn expand_vars(vars: &HashMap<String, String>) -> Result<HashMap<String, String>> {
    for (name, value) in vars {
        if value.contains(&placeholder(name)) {
            return Err(Error::Invalid(format!(
                "Cannot self-reference: {name} was '{value}'"
            )));
        }
    }

    let mut resolved = vars.clone();
    for _ in 0..=vars.len() {
        let snapshot = resolved.clone();
        let mut changed = false;
        for value in resolved.values_mut() {
            let substituted = substitute(value, &snapshot);
            if substituted != *value {
                *value = substituted;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for (name, value) in &resolved {
        let leftover: Vec<&str> = vars
            .keys()
            .filter(|key| value.contains(&placeholder(key)))
            .map(String::as_str)
            .collect();
        if !leftover.is_empty() {
            let involved: Vec<&str> = cycle_set(name, vars).into_iter().collect();
            return Err(Error::Invalid(format!(
                "'{name}' looks cyclical on {{{}}}: {}",
                involved.join(", "),
                vars[name.as_str()]
            )));
        }
    }

    Ok(resolved)
}
