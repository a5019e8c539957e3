//! File staging and publishing handlers.
//!
//! Both operate strictly inside their designated roots: staged files are
//! validated under the stage root, published files land under the publish
//! root. Every caller-supplied path passes the traversal guard first.

use serde_json::{json, Value};

use super::{HandlerOutcome, ToolContext, ToolError};

/// Validate a Markdown file with YAML front matter under the stage root.
pub async fn stage_markdown(ctx: &ToolContext, args: &Value) -> Result<HandlerOutcome, ToolError> {
    let raw_path = args
        .get("file_path")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::Invalid("file_path must be a string".to_string()))?;

    let resolved = ctx
        .guard_path(raw_path, &ctx.policy.stage_root, "blog_stage")
        .await?;

    if !has_allowed_extension(raw_path, &ctx.policy.allowed_extensions) {
        return Ok(HandlerOutcome {
            data: Some(json!({"allowed_extensions": ctx.policy.allowed_extensions})),
            ..HandlerOutcome::fail(
                "File extension not allowed",
                format!("'{raw_path}' does not end in an allowed extension"),
            )
        });
    }

    if !resolved.is_file() {
        return Ok(HandlerOutcome::fail(
            "Staging file not found",
            format!("no file at '{raw_path}' under the stage root"),
        ));
    }

    let content = match tokio::fs::read_to_string(&resolved).await {
        Ok(c) => c,
        Err(e) => {
            return Ok(HandlerOutcome::fail(
                "Staging file unreadable",
                format!("failed to read '{raw_path}': {e}"),
            ))
        }
    };

    if !has_front_matter(&content) {
        return Ok(HandlerOutcome::fail(
            "Markdown validation failed",
            format!("'{raw_path}' is missing YAML front matter"),
        ));
    }

    let mut outcome = HandlerOutcome::ok(format!("Markdown staged: {raw_path}"));
    outcome.data = Some(json!({
        "path": raw_path,
        "size_bytes": content.len(),
        "line_count": content.lines().count(),
        "has_front_matter": true,
    }));
    Ok(outcome)
}

/// Copy staged files into the publish root. Mutating; the dispatcher has
/// already enforced confirmation by the time this runs.
pub async fn publish_static(ctx: &ToolContext, args: &Value) -> Result<HandlerOutcome, ToolError> {
    let sources = args
        .get("source_files")
        .and_then(Value::as_array)
        .ok_or_else(|| ToolError::Invalid("source_files must be an array".to_string()))?;

    let stage_root = std::fs::canonicalize(&ctx.policy.stage_root)
        .unwrap_or_else(|_| ctx.policy.stage_root.clone());

    let mut published = Vec::new();
    for source in sources {
        let raw = source
            .as_str()
            .ok_or_else(|| ToolError::Invalid("source_files entries must be strings".to_string()))?;

        let resolved = ctx
            .guard_path(raw, &ctx.policy.stage_root, "blog_publish")
            .await?;

        if !resolved.is_file() {
            return Ok(HandlerOutcome::fail(
                "Publish source not found",
                format!("no staged file at '{raw}'"),
            ));
        }

        let relative = resolved
            .strip_prefix(&stage_root)
            .map_err(|_| ToolError::Invalid(format!("'{raw}' is outside the stage root")))?
            .to_path_buf();

        let destination = ctx
            .guard_path(
                &relative.to_string_lossy(),
                &ctx.policy.publish_root,
                "blog_publish",
            )
            .await?;

        if let Some(parent) = destination.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(HandlerOutcome::fail(
                    "Publish failed",
                    format!("cannot create '{}': {e}", parent.display()),
                ));
            }
        }
        if let Err(e) = tokio::fs::copy(&resolved, &destination).await {
            return Ok(HandlerOutcome::fail(
                "Publish failed",
                format!("cannot copy '{raw}': {e}"),
            ));
        }
        published.push(relative.to_string_lossy().into_owned());
    }

    let mut outcome = HandlerOutcome::ok(format!(
        "Published {} file(s) to {}",
        published.len(),
        ctx.policy.publish_root.display()
    ));
    outcome.data = Some(json!({"published": published}));
    Ok(outcome)
}

fn has_allowed_extension(path: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|ext| path.ends_with(ext.as_str()))
}

fn has_front_matter(content: &str) -> bool {
    let Some(rest) = content.strip_prefix("---") else {
        return false;
    };
    rest.contains("\n---")
}
