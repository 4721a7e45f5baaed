use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::str::FromStr;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::datetime::check_horizon;
use crate::grid::WeekStart;

const RC_ENV_VAR: &str = "CONGREGATERC";
const RC_FILE_NAME: &str =
  ".congregaterc";
const DEFAULT_DATA_DIR: &str =
  "~/.congregate";
pub const DEFAULT_UPCOMING_DAYS: u32 =
  30;

/// Who is operating the dashboard.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default
)]
pub enum AppRole {
  #[default]
  Admin,
  Viewer
}

impl AppRole {
  #[must_use]
  pub fn can_write(self) -> bool {
    matches!(self, Self::Admin)
  }

  #[must_use]
  pub fn as_str(self) -> &'static str {
    match self {
      | Self::Admin => "admin",
      | Self::Viewer => "viewer"
    }
  }
}

impl FromStr for AppRole {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "admin" => Ok(Self::Admin),
      | "viewer" => Ok(Self::Viewer),
      | other => {
        Err(anyhow!(
          "invalid role: {other} \
           (expected admin or viewer)"
        ))
      }
    }
  }
}

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::defaults();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading congregaterc");
      cfg.load_file(&path)?;
    } else {
      warn!(
        "no congregaterc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  /// Built-in values only, no file
  /// lookup.
  #[must_use]
  pub fn defaults() -> Self {
    let mut map = HashMap::new();
    for (key, value) in [
      (
        "data.location",
        DEFAULT_DATA_DIR
      ),
      ("default.command", "month"),
      ("color", "on"),
      (
        "calendar.week_start",
        "sunday"
      ),
      (
        "calendar.upcoming_days",
        "30"
      ),
      ("user.role", "admin")
    ] {
      map.insert(
        key.to_string(),
        value.to_string()
      );
    }

    Self {
      map,
      loaded_files: vec![]
    }
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  pub fn week_start(
    &self
  ) -> anyhow::Result<WeekStart> {
    self
      .get("calendar.week_start")
      .map_or(
        Ok(WeekStart::default()),
        |raw| raw.parse()
      )
      .context(
        "invalid calendar.week_start"
      )
  }

  pub fn upcoming_days(
    &self
  ) -> anyhow::Result<u32> {
    match self
      .get("calendar.upcoming_days")
    {
      | Some(raw) => {
        let days = raw
          .trim()
          .parse()
          .with_context(|| {
            format!(
              "invalid \
               calendar.upcoming_days: \
               {raw}"
            )
          })?;
        check_horizon(days).context(
          "invalid \
           calendar.upcoming_days"
        )
      }
      | None => {
        Ok(DEFAULT_UPCOMING_DAYS)
      }
    }
  }

  pub fn role(
    &self
  ) -> anyhow::Result<AppRole> {
    self
      .get("user.role")
      .map_or(
        Ok(AppRole::default()),
        |raw| raw.parse()
      )
      .context("invalid user.role")
  }

  pub fn timezone(
    &self
  ) -> Option<String> {
    self
      .get("calendar.timezone")
      .filter(|raw| !raw.trim().is_empty())
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    expand_tilde(Path::new(
      DEFAULT_DATA_DIR
    ))
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  let candidate =
    home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}
