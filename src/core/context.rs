//! Everything a command needs: settings, resolved paths and the store.

use crate::error::Result;
use crate::paths::Paths;
use crate::settings::Settings;
use crate::store::Store;

pub struct Context {
    pub settings: Settings,
    pub paths: Paths,
    pub store: Store,
}

impl Context {
    /// Resolve paths from `settings` and open the database under `data_dir`.
    pub fn open(settings: Settings) -> Result<Self> {
        let paths = Paths::resolve(&settings)?;
        let store = Store::open(&paths.database())?;
        Ok(Self {
            settings,
            paths,
            store,
        })
    }
}
