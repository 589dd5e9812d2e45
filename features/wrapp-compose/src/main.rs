use std::{error::Error, sync::Arc};

use wrapp_compose::{
    ContainerBuilder, DynError, ImportInfo, Imports, InstanceFactory, Metadata, MetadataValue, MetadataView,
    Sharing,
};

fn main() -> Result<(), Box<dyn Error>> {
    let container = ContainerBuilder::new()
        .add_instance("wrapp".to_string())
        .add_instance(Plugin("metrics"))
        .add_instance(Plugin("auth"))
        .add_factory(AppFactory)
        .build();

    println!("{:?}", container);

    let lazy = container.get_lazy::<App, Version>()?;
    println!("app v{} - created: {}", lazy.metadata().0, lazy.is_value_created());

    let plugins: Vec<&str> = lazy.plugins.iter().map(|plugin| plugin.0).collect();
    println!("{} has plugins: {}", lazy.name, plugins.join(", "));
    println!("created: {}", lazy.is_value_created());
    Ok(())
}

struct Plugin(&'static str);

struct Version(i64);
impl MetadataView for Version {
    fn project(metadata: &Metadata) -> Result<Self, DynError> {
        let version = metadata
            .get("Version")
            .and_then(MetadataValue::as_int)
            .ok_or("missing version")?;
        Ok(Version(version))
    }
}

struct App {
    name: Arc<String>,
    plugins: Vec<Arc<Plugin>>,
}
struct AppFactory;
impl InstanceFactory for AppFactory {
    type Provides = App;

    fn get_imports() -> Vec<ImportInfo> {
        vec![
            ImportInfo::of::<String>("name"),
            ImportInfo::many::<Vec<Arc<Plugin>>>("plugins"),
        ]
    }

    fn metadata(&self) -> Metadata {
        Metadata::from([("Version".to_string(), 1.into())])
    }

    fn sharing(&self) -> Sharing {
        Sharing::Shared
    }

    fn construct(&self, imports: &Imports) -> Result<Self::Provides, DynError> {
        Ok(App {
            name: imports.get("name")?,
            plugins: imports.get::<Vec<Arc<Plugin>>>("plugins")?.to_vec(),
        })
    }
}
