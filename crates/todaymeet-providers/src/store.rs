//! Token persistence.
//!
//! A store holds at most one [`TokenSet`]. Sets are replaced whole, so a
//! reader sees either the previous pair or the new one, never a mix.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::tokens::TokenSet;

/// Persistent holder of the current token set.
pub trait TokenStore: Send + Sync {
    /// Returns the stored set, if any.
    fn load(&self) -> Option<TokenSet>;

    /// Replaces the stored set. Durable when this returns `Ok`.
    fn save(&self, tokens: &TokenSet) -> ProviderResult<()>;

    /// Removes the stored set. Clearing an empty store is not an error.
    fn clear(&self) -> ProviderResult<()>;
}

/// A process-local store. Tokens are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<Option<TokenSet>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<TokenSet> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save(&self, tokens: &TokenSet) -> ProviderResult<()> {
        tokens.validate()?;
        *self.tokens.write().unwrap_or_else(PoisonError::into_inner) = Some(tokens.clone());
        Ok(())
    }

    fn clear(&self) -> ProviderResult<()> {
        *self.tokens.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// A JSON file store with an in-memory mirror.
///
/// Writes go to a sibling temp file which is synced and renamed over the
/// target. On Unix the file is created with mode 0600.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    tokens: RwLock<Option<TokenSet>>,
}

impl FileTokenStore {
    /// Opens the store at `path`, loading any existing token set.
    ///
    /// A missing file yields an empty store. A file that cannot be parsed or
    /// holds an incomplete pair is an error rather than silently discarded.
    pub fn open(path: impl Into<PathBuf>) -> ProviderResult<Self> {
        let path = path.into();
        let tokens = Self::read(&path)?;
        if tokens.is_some() {
            info!(path = %path.display(), "loaded stored tokens");
        }
        Ok(Self {
            path,
            tokens: RwLock::new(tokens),
        })
    }

    /// Returns the token file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(path: &Path) -> ProviderResult<Option<TokenSet>> {
        if !path.exists() {
            debug!(path = %path.display(), "no token file");
            return Ok(None);
        }

        let content = fs::read_to_string(path).map_err(|e| {
            ProviderError::storage(format!("failed to read token file {}", path.display()))
                .with_source(e)
        })?;
        let tokens: TokenSet = serde_json::from_str(&content).map_err(|e| {
            ProviderError::storage(format!("failed to parse token file {}", path.display()))
                .with_source(e)
        })?;
        tokens.validate()?;
        Ok(Some(tokens))
    }

    fn write(&self, tokens: &TokenSet) -> ProviderResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                ProviderError::storage("failed to create token directory").with_source(e)
            })?;
        }

        let content = serde_json::to_vec_pretty(tokens).map_err(|e| {
            ProviderError::internal("failed to serialize tokens").with_source(e)
        })?;

        let temp_path = self.path.with_extension("json.tmp");
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&temp_path).map_err(|e| {
            ProviderError::storage("failed to create temporary token file").with_source(e)
        })?;
        file.write_all(&content)
            .and_then(|()| file.sync_all())
            .map_err(|e| ProviderError::storage("failed to write token file").with_source(e))?;
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(|e| {
            ProviderError::storage("failed to replace token file").with_source(e)
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600)) {
                warn!(error = %e, "failed to restrict token file permissions");
            }
        }

        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Option<TokenSet> {
        self.tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save(&self, tokens: &TokenSet) -> ProviderResult<()> {
        tokens.validate()?;
        // The write lock covers the disk write so the mirror and the file
        // always agree.
        let mut guard = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        self.write(tokens)?;
        *guard = Some(tokens.clone());
        debug!(path = %self.path.display(), expires_at = %tokens.expires_at(), "saved tokens");
        Ok(())
    }

    fn clear(&self) -> ProviderResult<()> {
        let mut guard = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "cleared stored tokens");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProviderError::storage("failed to remove token file").with_source(e)),
        }
    }
}
