use crate::api::NotionApi;
use anyhow::{anyhow, Result};
use serde_json::Value as JsonValue;
use std::io::{self, BufRead, Write};

/// Interactive fallback when no root page is configured: list the pages the
/// integration can see and let the user pick one.
pub fn pick_page(api: &NotionApi) -> Result<String> {
    let results = api.search_pages()?;
    let candidates = collect_pages(&results);
    if candidates.is_empty() {
        return Err(anyhow!(
            "no pages are shared with the integration; share one in Notion and retry"
        ));
    }

    println!("Select the page to sync experiments under:");
    for (index, (title, _)) in candidates.iter().enumerate() {
        println!("  {}: {}", index, title);
    }
    print!("Page number: ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let choice: usize = line
        .trim()
        .parse()
        .map_err(|_| anyhow!("expected a page number between 0 and {}", candidates.len() - 1))?;
    let (_, page_id) = candidates
        .get(choice)
        .ok_or_else(|| anyhow!("page number {choice} is out of range"))?;
    Ok(page_id.clone())
}

fn collect_pages(results: &JsonValue) -> Vec<(String, String)> {
    let mut pages = Vec::new();
    for page in results["results"].as_array().map(Vec::as_slice).unwrap_or_default() {
        if page["object"].as_str() != Some("page") {
            continue;
        }
        let Some(id) = page["id"].as_str() else {
            continue;
        };
        pages.push((page_title(page), id.to_string()));
    }
    pages
}

fn page_title(page: &JsonValue) -> String {
    if let Some(properties) = page["properties"].as_object() {
        for property in properties.values() {
            if property["type"].as_str() == Some("title") {
                if let Some(text) = property["title"][0]["plain_text"].as_str() {
                    return text.to_string();
                }
                if let Some(text) = property["title"][0]["text"]["content"].as_str() {
                    return text.to_string();
                }
            }
        }
    }
    page["url"].as_str().unwrap_or("(untitled)").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collects_titled_pages() {
        let results = json!({"results": [
            {"object": "page", "id": "p1", "properties": {
                "title": {"type": "title", "title": [{"plain_text": "Experiments"}]}
            }},
            {"object": "database", "id": "d1"},
            {"object": "page", "id": "p2", "url": "https://www.notion.so/p2"},
        ]});
        let pages = collect_pages(&results);
        assert_eq!(
            pages,
            vec![
                ("Experiments".to_string(), "p1".to_string()),
                ("https://www.notion.so/p2".to_string(), "p2".to_string()),
            ]
        );
    }
}
