//
//  bitbucket-cli
//  cli/api.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! Direct API access command
//!
//! This command makes authenticated requests to the Bitbucket Cloud API,
//! similar to `gh api` for GitHub. It goes through the same client as the
//! rest of `bb`, so it retries, refreshes tokens and honors `--deadline`.
//!
//! ## Examples
//!
//! ```bash
//! # Get the authenticated user
//! bb api /user
//!
//! # Create an issue with POST
//! bb api -X POST /repositories/workspace/repo/issues \
//!     -F title="Bug report" -F content.raw="Description here"
//!
//! # Paginate through results, stopping after 200 items
//! bb api /repositories/workspace/repo/commits --paginate --limit 200
//! ```

use std::fs;

use anyhow::{bail, Result};
use clap::Args;
use reqwest::Method;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::api::{PageOptions, DEFAULT_PAGE_LEN};

use super::{GlobalOptions, Session};

/// Make direct API requests
#[derive(Args, Debug)]
pub struct ApiCommand {
    /// API endpoint relative to the base URL (e.g., /repositories/workspace/repo)
    pub endpoint: String,

    /// HTTP method (GET, POST, PUT, PATCH, DELETE)
    #[arg(long, short = 'X', default_value = "GET")]
    pub method: String,

    /// Request body fields as JSON (key=value, can be nested with dots)
    #[arg(long, short = 'F', action = clap::ArgAction::Append)]
    pub field: Vec<String>,

    /// Raw field values (not JSON-encoded, strings only)
    #[arg(long, action = clap::ArgAction::Append)]
    pub raw_field: Vec<String>,

    /// Read request body from file (- for stdin)
    #[arg(long, short = 'f')]
    pub input: Option<String>,

    /// Paginate through all results
    #[arg(long)]
    pub paginate: bool,

    /// Items per page when paginating
    #[arg(long, default_value_t = DEFAULT_PAGE_LEN)]
    pub page_len: u32,

    /// Stop after this many items when paginating
    #[arg(long)]
    pub limit: Option<usize>,

    /// Include response status and headers in output
    #[arg(long, short = 'i')]
    pub include: bool,

    /// Suppress output (only report failures)
    #[arg(long)]
    pub silent: bool,
}

impl ApiCommand {
    pub async fn run(&self, global: &GlobalOptions, cancel: CancellationToken) -> Result<()> {
        let method = parse_method(&self.method)?;
        let body = self.build_body()?;
        let session = Session::open(global, cancel)?;

        if self.paginate {
            if method != Method::GET {
                bail!("--paginate only works with GET requests");
            }
            return self.execute_paginated(&session, global).await;
        }

        let response = session
            .client
            .request(&session.ctx, method, &self.endpoint, body.as_ref())
            .await?;

        if self.include {
            println!("HTTP {}", response.status);
            for (name, value) in response.headers.iter() {
                println!("{}: {}", name, value.to_str().unwrap_or(""));
            }
            println!();
        }

        if self.silent {
            return Ok(());
        }

        let text = response.text();
        match serde_json::from_str::<Value>(&text) {
            Ok(json) if global.json => println!("{json}"),
            Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
            Err(_) => println!("{text}"),
        }

        Ok(())
    }

    async fn execute_paginated(&self, session: &Session, global: &GlobalOptions) -> Result<()> {
        let mut options = PageOptions::new().page_len(self.page_len);
        if let Some(limit) = self.limit {
            options = options.limit(limit);
        }

        let mut pages = session.client.paginate::<Value>(&self.endpoint, options)?;
        let values = pages.collect_all(&session.ctx).await?;

        if self.silent {
            return Ok(());
        }

        let result = serde_json::json!({
            "values": values,
            "size": values.len(),
        });
        if global.json {
            println!("{result}");
        } else {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Ok(())
    }

    fn build_body(&self) -> Result<Option<Value>> {
        // If input file is specified, read from it
        if let Some(input) = &self.input {
            let content = if input == "-" {
                let mut buffer = String::new();
                std::io::Read::read_to_string(&mut std::io::stdin(), &mut buffer)?;
                buffer
            } else {
                fs::read_to_string(input)?
            };

            let value: Value = serde_json::from_str(&content)?;
            return Ok(Some(value));
        }

        if self.field.is_empty() && self.raw_field.is_empty() {
            return Ok(None);
        }

        let mut body = serde_json::Map::new();

        for field in &self.field {
            let (key, value) = split_field(field)?;
            set_nested_value(&mut body, key, parse_field_value(value));
        }

        for field in &self.raw_field {
            let (key, value) = split_field(field)?;
            set_nested_value(&mut body, key, Value::String(value.to_string()));
        }

        Ok(Some(Value::Object(body)))
    }
}

fn parse_method(method: &str) -> Result<Method> {
    match method.to_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        _ => bail!("Unsupported HTTP method: {}", method),
    }
}

fn split_field(field: &str) -> Result<(&str, &str)> {
    match field.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => bail!("Invalid field format: {}. Expected key=value", field),
    }
}

/// Interprets a `-F` value as JSON where it looks like JSON.
fn parse_field_value(value: &str) -> Value {
    match value {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => {
            if let Ok(n) = value.parse::<i64>() {
                Value::Number(n.into())
            } else if value.starts_with('[') || value.starts_with('{') {
                serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()))
            } else {
                Value::String(value.to_string())
            }
        }
    }
}

fn set_nested_value(obj: &mut serde_json::Map<String, Value>, key: &str, value: Value) {
    match key.split_once('.') {
        None => {
            obj.insert(key.to_string(), value);
        }
        Some((first, rest)) => {
            let entry = obj
                .entry(first.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(serde_json::Map::new());
            }
            if let Value::Object(nested) = entry {
                set_nested_value(nested, rest, value);
            }
        }
    }
}
