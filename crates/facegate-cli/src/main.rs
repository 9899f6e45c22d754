use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facegate_hw::{Camera, FrameSource};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facegate", about = "facegate face enrollment and check-in CLI")]
struct Cli {
    /// Base URL of the facegated HTTP API
    #[arg(long, env = "FACEGATE_SERVER", default_value = "http://127.0.0.1:7878")]
    server: String,

    /// Bearer token, when the daemon requires one
    #[arg(long, env = "FACEGATE_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a member's face using the daemon camera
    Enroll {
        /// Member identifier
        #[arg(short, long)]
        user: String,
    },
    /// Capture a face and identify it against enrolled members
    CheckIn,
    /// Identify a descriptor read from a JSON file (array or {"descriptor": [...]})
    Identify {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Show the descriptor enrolled for a member
    List {
        #[arg(short, long)]
        user: String,
    },
    /// Remove an enrolled descriptor by id
    Remove { id: String },
    /// List members, optionally filtered by enrollment state
    Members {
        #[arg(long, conflicts_with = "without")]
        with: bool,
        #[arg(long)]
        without: bool,
    },
    /// Add or update a member in the directory
    MemberAdd {
        #[arg(short, long)]
        user: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: Option<String>,
    },
    /// Cancel the running capture session
    Cancel,
    /// Show daemon status
    Status,
    /// Run local camera diagnostics (bypasses the daemon)
    Test {
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Write the captured frame to this image file
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

struct Client {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl Client {
    fn new(base: &str, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Send and decode a JSON body, turning API errors into readable messages.
    async fn send(&self, builder: RequestBuilder) -> Result<Value> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("cannot reach facegated at {}", self.base))?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if status.is_success() {
            return Ok(body);
        }
        if status == StatusCode::CONFLICT && body["alreadyRegistered"] == true {
            bail!("already enrolled (registered at {})", body["registeredAt"].as_str().unwrap_or("?"));
        }
        let message = body["error"].as_str().unwrap_or("request failed");
        let code = body["code"].as_str().unwrap_or("unknown");
        bail!("{status}: {message} [{code}]")
    }
}

fn print_outcome(body: &Value) {
    match body["status"].as_str() {
        Some("match") => println!(
            "Matched {} (distance {:.4}, confidence {:.2})",
            body["userId"].as_str().unwrap_or("?"),
            body["distance"].as_f64().unwrap_or(f64::NAN),
            body["confidence"].as_f64().unwrap_or(0.0),
        ),
        Some("ambiguous") => {
            println!("Ambiguous match at distance {:.4}:", body["distance"].as_f64().unwrap_or(f64::NAN));
            for candidate in body["candidates"].as_array().into_iter().flatten() {
                println!("  {}", candidate["userId"].as_str().unwrap_or("?"));
            }
        }
        _ => match body["nearestDistance"].as_f64() {
            Some(d) => println!("No match (nearest distance {d:.4})"),
            None => println!("No match (nobody enrolled)"),
        },
    }
}

fn read_descriptor(path: &Path) -> Result<Vec<f32>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw).context("descriptor file is not valid JSON")?;
    let values = match value {
        Value::Object(mut obj) => obj.remove("descriptor").unwrap_or(Value::Null),
        other => other,
    };
    serde_json::from_value(values).context("expected an array of numbers")
}

fn camera_test(device: &str, save: Option<PathBuf>) -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in &devices {
        println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }

    println!("\nOpening {device}...");
    let mut camera = Camera::open(device)?;
    println!("  format: {}x{} {:?}", camera.width, camera.height, camera.fourcc);

    let frame = camera.grab()?;
    println!(
        "  frame #{}: brightness {:.1}, dark: {}",
        frame.sequence,
        frame.avg_brightness(),
        frame.is_dark()
    );

    if let Some(path) = save {
        facegate_hw::save_preview(&frame, &path)?;
        println!("  saved to {}", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = Client::new(&cli.server, cli.token);

    match cli.command {
        Commands::Enroll { user } => {
            println!("Enrolling {user}; look at the camera...");
            let body = client
                .send(
                    client
                        .request(Method::POST, "/facial-recognition/sessions/enroll")
                        .json(&json!({ "userId": user })),
                )
                .await?;
            println!(
                "Enrolled {} from {} samples (quality {:.2}, id {})",
                body["userId"].as_str().unwrap_or("?"),
                body["sampleCount"],
                body["qualityScore"].as_f64().unwrap_or(0.0),
                body["id"].as_str().unwrap_or("?"),
            );
        }
        Commands::CheckIn => {
            println!("Checking in; look at the camera...");
            let body = client
                .send(client.request(Method::POST, "/facial-recognition/sessions/check-in"))
                .await?;
            print_outcome(&body);
        }
        Commands::Identify { file } => {
            let descriptor = read_descriptor(&file)?;
            let body = client
                .send(
                    client
                        .request(Method::POST, "/facial-recognition/identify")
                        .json(&json!({ "descriptor": descriptor })),
                )
                .await?;
            print_outcome(&body);
        }
        Commands::List { user } => {
            let body = client
                .send(
                    client
                        .request(Method::GET, "/facial-recognition")
                        .query(&[("userId", user.as_str())]),
                )
                .await?;
            let records = body.as_array().cloned().unwrap_or_default();
            if records.is_empty() {
                println!("No descriptor enrolled for {user}");
            }
            for r in records {
                println!(
                    "{}  quality {:.2}  created {}",
                    r["id"].as_str().unwrap_or("?"),
                    r["qualityScore"].as_f64().unwrap_or(0.0),
                    r["createdAt"].as_str().unwrap_or("?"),
                );
            }
        }
        Commands::Remove { id } => {
            client
                .send(client.request(Method::DELETE, &format!("/facial-recognition/{id}")))
                .await?;
            println!("Removed {id}");
        }
        Commands::Members { with, without } => {
            let mut request = client.request(Method::GET, "/facial-recognition/members");
            if with {
                request = request.query(&[("withFaceDescriptor", "true")]);
            }
            if without {
                request = request.query(&[("withoutFaceDescriptor", "true")]);
            }
            let body = client.send(request).await?;
            for m in body.as_array().into_iter().flatten() {
                println!(
                    "{}  {}",
                    m["userId"].as_str().unwrap_or("?"),
                    m["displayName"].as_str().unwrap_or("")
                );
            }
        }
        Commands::MemberAdd { user, name, email } => {
            client
                .send(
                    client
                        .request(Method::POST, "/facial-recognition/members")
                        .json(&json!({ "userId": user, "displayName": name, "email": email })),
                )
                .await?;
            println!("Saved member {user}");
        }
        Commands::Cancel => {
            let body = client
                .send(client.request(Method::POST, "/facial-recognition/sessions/cancel"))
                .await?;
            if body["cancelled"] == true {
                println!("Cancellation requested");
            } else {
                println!("No capture session running");
            }
        }
        Commands::Status => {
            let body = client.send(client.request(Method::GET, "/status")).await?;
            println!("facegated at {}", client.base);
            println!("  enrolled:        {}", body["enrolled"]);
            println!("  detector loaded: {}", body["detectorLoaded"]);
            println!("  camera enabled:  {}", body["cameraEnabled"]);
            println!("  session running: {}", body["sessionRunning"]);
            println!("  match threshold: {}", body["matchThreshold"]);
        }
        Commands::Test { device, save } => {
            tokio::task::spawn_blocking(move || camera_test(&device, save)).await??;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_descriptor_accepts_both_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let bare = dir.path().join("bare.json");
        std::fs::write(&bare, "[0.5, 0.25]").unwrap();
        assert_eq!(read_descriptor(&bare).unwrap(), vec![0.5, 0.25]);

        let wrapped = dir.path().join("wrapped.json");
        std::fs::write(&wrapped, r#"{"descriptor": [1.0]}"#).unwrap();
        assert_eq!(read_descriptor(&wrapped).unwrap(), vec![1.0]);

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{"vector": [1.0]}"#).unwrap();
        assert!(read_descriptor(&bad).is_err());
    }

    #[test]
    fn test_cli_parses_member_filters() {
        let cli = Cli::try_parse_from(["facegate", "members", "--without"]).unwrap();
        assert!(matches!(cli.command, Commands::Members { with: false, without: true }));
        assert!(Cli::try_parse_from(["facegate", "members", "--with", "--without"]).is_err());
    }
}
