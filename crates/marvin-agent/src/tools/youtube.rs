//! `youtube_search` — YouTube Data API v3: search, video details, channel
//! stats, and comment threads.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::OnceLock;

use super::{Caller, Tool, ToolReply};

const BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

pub struct YouTubeSearchTool {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl YouTubeSearchTool {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct Input {
    action: String,
    query: String,
    #[serde(default)]
    max_results: Option<usize>,
}

/// Extract a video id from a watch URL, a youtu.be link, or a bare id.
fn video_id(query: &str) -> String {
    static WATCH: OnceLock<Regex> = OnceLock::new();
    static SHORT: OnceLock<Regex> = OnceLock::new();
    let watch = WATCH.get_or_init(|| Regex::new(r"(?:v=|/)([\w-]{11})(?:\?|&|/|$)").unwrap());
    let short = SHORT.get_or_init(|| Regex::new(r"youtu\.be/([\w-]{11})").unwrap());

    if let Some(caps) = short.captures(query) {
        return caps[1].to_string();
    }
    if let Some(caps) = watch.captures(query) {
        return caps[1].to_string();
    }
    query.trim().to_string()
}

#[async_trait]
impl Tool for YouTubeSearchTool {
    fn name(&self) -> &str {
        "youtube_search"
    }

    fn description(&self) -> &str {
        "Interact with YouTube: search for videos or channels, get video details, \
         channel stats, or read top comments. Actions: 'search' (find videos), \
         'video_details' (stats/description for a video URL or ID), \
         'channel_details' (channel stats), 'comments' (top comments of a video)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["search", "video_details", "channel_details", "comments"],
                    "description": "The action to perform"
                },
                "query": {
                    "type": "string",
                    "description": "For 'search': the search term. For 'video_details'/'comments': a video URL or ID. For 'channel_details': a channel name or ID."
                },
                "max_results": {
                    "type": "integer",
                    "description": "Number of results (default 5 for search, 10 for comments)"
                }
            },
            "required": ["action", "query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, _caller: &Caller) -> ToolReply {
        let Some(ref api_key) = self.api_key else {
            return ToolReply::error("Error: GOOGLE_API_KEY not configured");
        };
        let input: Input = match serde_json::from_value(args) {
            Ok(input) => input,
            Err(e) => return ToolReply::error(format!("Error: invalid arguments - {e}")),
        };

        let result = match input.action.as_str() {
            "search" => self.search(api_key, &input.query, input.max_results.unwrap_or(5)).await,
            "video_details" => self.video_details(api_key, &video_id(&input.query)).await,
            "channel_details" => self.channel_details(api_key, &input.query).await,
            "comments" => {
                self.comments(api_key, &video_id(&input.query), input.max_results.unwrap_or(10))
                    .await
            }
            other => Err(format!("unknown action '{other}'")),
        };

        match result {
            Ok(out) => ToolReply::text(out),
            Err(e) => ToolReply::error(format!("Error: {e}")),
        }
    }
}

impl YouTubeSearchTool {
    async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, String> {
        let resp = self
            .client
            .get(format!("{BASE_URL}/{path}"))
            .query(params)
            .send()
            .await
            .map_err(|e| format!("request failed - {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("YouTube API HTTP {}", resp.status().as_u16()));
        }
        resp.json().await.map_err(|e| format!("bad response - {e}"))
    }

    async fn search(&self, key: &str, query: &str, max: usize) -> Result<String, String> {
        let max = max.clamp(1, 10).to_string();
        let body = self
            .get(
                "search",
                &[
                    ("part", "snippet"),
                    ("type", "video"),
                    ("q", query),
                    ("maxResults", &max),
                    ("key", key),
                ],
            )
            .await?;

        let items = body["items"].as_array().cloned().unwrap_or_default();
        if items.is_empty() {
            return Ok(format!("No videos found for '{query}'."));
        }
        let lines: Vec<String> = items
            .iter()
            .filter_map(|item| {
                let id = item.pointer("/id/videoId")?.as_str()?;
                let title = item.pointer("/snippet/title")?.as_str()?;
                let channel = item.pointer("/snippet/channelTitle")?.as_str()?;
                Some(format!(
                    "{title} by {channel} - https://youtu.be/{id}"
                ))
            })
            .collect();
        Ok(format!("YouTube results for '{query}':\n{}", lines.join("\n")))
    }

    async fn video_details(&self, key: &str, id: &str) -> Result<String, String> {
        let body = self
            .get(
                "videos",
                &[("part", "snippet,statistics"), ("id", id), ("key", key)],
            )
            .await?;
        let Some(item) = body["items"].as_array().and_then(|a| a.first()) else {
            return Ok(format!("Video '{id}' not found."));
        };
        let title = item.pointer("/snippet/title").and_then(|v| v.as_str()).unwrap_or("?");
        let channel = item
            .pointer("/snippet/channelTitle")
            .and_then(|v| v.as_str())
            .unwrap_or("?");
        let views = item.pointer("/statistics/viewCount").and_then(|v| v.as_str()).unwrap_or("?");
        let likes = item.pointer("/statistics/likeCount").and_then(|v| v.as_str()).unwrap_or("?");
        Ok(format!(
            "{title} by {channel}: {views} views, {likes} likes - https://youtu.be/{id}"
        ))
    }

    async fn channel_details(&self, key: &str, query: &str) -> Result<String, String> {
        // Resolve the channel by search first so names work, not just IDs.
        let search = self
            .get(
                "search",
                &[
                    ("part", "snippet"),
                    ("type", "channel"),
                    ("q", query),
                    ("maxResults", "1"),
                    ("key", key),
                ],
            )
            .await?;
        let Some(id) = search
            .pointer("/items/0/id/channelId")
            .and_then(|v| v.as_str())
            .map(String::from)
        else {
            return Ok(format!("Channel '{query}' not found."));
        };

        let body = self
            .get(
                "channels",
                &[("part", "snippet,statistics"), ("id", &id), ("key", key)],
            )
            .await?;
        let Some(item) = body["items"].as_array().and_then(|a| a.first()) else {
            return Ok(format!("Channel '{query}' not found."));
        };
        let title = item.pointer("/snippet/title").and_then(|v| v.as_str()).unwrap_or("?");
        let subs = item
            .pointer("/statistics/subscriberCount")
            .and_then(|v| v.as_str())
            .unwrap_or("?");
        let videos = item
            .pointer("/statistics/videoCount")
            .and_then(|v| v.as_str())
            .unwrap_or("?");
        Ok(format!("{title}: {subs} subscribers, {videos} videos"))
    }

    async fn comments(&self, key: &str, id: &str, max: usize) -> Result<String, String> {
        let max = max.clamp(1, 25).to_string();
        let body = self
            .get(
                "commentThreads",
                &[
                    ("part", "snippet"),
                    ("videoId", id),
                    ("maxResults", &max),
                    ("order", "relevance"),
                    ("key", key),
                ],
            )
            .await?;
        let items = body["items"].as_array().cloned().unwrap_or_default();
        if items.is_empty() {
            return Ok("No comments found.".to_string());
        }
        let lines: Vec<String> = items
            .iter()
            .filter_map(|item| {
                let snippet = item.pointer("/snippet/topLevelComment/snippet")?;
                let author = snippet["authorDisplayName"].as_str()?;
                let text = snippet["textOriginal"].as_str()?;
                let preview: String = text.chars().take(200).collect();
                Some(format!("{author}: {preview}"))
            })
            .collect();
        Ok(format!("Top comments:\n{}", lines.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_ids_extract_from_common_url_shapes() {
        assert_eq!(video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), "dQw4w9WgXcQ");
        assert_eq!(video_id("https://youtu.be/dQw4w9WgXcQ"), "dQw4w9WgXcQ");
        assert_eq!(video_id("dQw4w9WgXcQ"), "dQw4w9WgXcQ");
    }
}
