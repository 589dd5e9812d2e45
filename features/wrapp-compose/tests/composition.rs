use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, OnceLock,
};

use static_assertions::assert_impl_all;
use wrapp_compose::{
    CompositionContainer, CompositionContract, CompositionError, ContainerBuilder, DynError, ImportInfo, Imports,
    InstanceFactory, Lazy, Metadata, MetadataValue, Sharing,
};

assert_impl_all!(CompositionContainer: Send, Sync, Clone);

#[derive(Debug)]
struct Greeter(String);
struct GreeterFactory;
impl InstanceFactory for GreeterFactory {
    type Provides = Greeter;

    fn get_imports() -> Vec<ImportInfo> {
        vec![ImportInfo::of::<String>("name")]
    }

    fn construct(&self, imports: &Imports) -> Result<Self::Provides, DynError> {
        Ok(Greeter(format!("Hello {}", imports.get::<String>("name")?)))
    }
}

#[test]
fn composes_factories_from_instances() {
    let container = ContainerBuilder::new()
        .add_instance("World".to_string())
        .add_factory(GreeterFactory)
        .build();

    let greeter = container.get_export::<Greeter>().unwrap();
    assert_eq!(greeter.0, "Hello World");
}

#[test]
fn named_exports_only_match_their_name() {
    let container = ContainerBuilder::new()
        .add_named_instance("primary", "db://primary".to_string())
        .add_named_instance("replica", "db://replica".to_string())
        .build();

    assert_eq!(*container.get_named_export::<String>("replica").unwrap(), "db://replica");
    assert!(container.try_get_export::<String>().unwrap().is_none());
}

#[test]
fn missing_exports_are_reported() {
    let container = ContainerBuilder::new().build();

    assert!(container.try_get_export::<u32>().unwrap().is_none());
    let err = container.get_export::<u32>().unwrap_err();
    assert!(matches!(err, CompositionError::NoExport { .. }));
}

#[test]
fn missing_dependencies_name_the_importer() {
    let container = ContainerBuilder::new().add_factory(GreeterFactory).build();

    let err = container.get_export::<Greeter>().unwrap_err();
    let CompositionError::MissingDependency { site, required_by, .. } = err else {
        panic!("expected a missing dependency, got {err:?}");
    };
    assert_eq!(site, "name");
    assert_eq!(required_by, "GreeterFactory");
}

#[test]
fn several_exports_are_ambiguous_for_single_imports() {
    let container = ContainerBuilder::new().add_instance(1_u32).add_instance(2_u32).build();

    let err = container.get_export::<u32>().unwrap_err();
    assert!(matches!(err, CompositionError::AmbiguousMatch { .. }));

    let all: Vec<u32> = container.get_exports::<u32>().unwrap().iter().map(|value| **value).collect();
    assert_eq!(all, vec![1, 2]);
}

#[test]
fn many_of_nothing_is_empty() {
    let container = ContainerBuilder::new().build();
    assert!(container.get_exports::<String>().unwrap().is_empty());
}

#[test]
fn constraints_select_exports_by_metadata() {
    let container = ContainerBuilder::new()
        .add_instance_with_metadata(8080_u16, Metadata::from([("Protocol".to_string(), "http".into())]))
        .add_instance_with_metadata(8443_u16, Metadata::from([("Protocol".to_string(), "https".into())]))
        .build();

    let contract = CompositionContract::of::<u16>().with_constraint("Protocol", "https");
    let port = container.get_export_for(&contract).unwrap().downcast::<u16>().unwrap();
    assert_eq!(*port, 8443);
}

#[derive(Debug)]
struct Port(i64);
impl wrapp_compose::MetadataView for Port {
    fn project(metadata: &Metadata) -> Result<Self, DynError> {
        let port = metadata
            .get("Port")
            .and_then(MetadataValue::as_int)
            .ok_or("metadata 'Port' is missing")?;
        Ok(Port(port))
    }
}

struct Server {
    started: Arc<AtomicUsize>,
}
struct ServerFactory(Arc<AtomicUsize>);
impl InstanceFactory for ServerFactory {
    type Provides = Server;

    fn get_imports() -> Vec<ImportInfo> {
        Vec::new()
    }

    fn metadata(&self) -> Metadata {
        Metadata::from([("Port".to_string(), 8080.into())])
    }

    fn construct(&self, _imports: &Imports) -> Result<Self::Provides, DynError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(Server {
            started: self.0.clone(),
        })
    }
}

#[test]
fn lazy_exposes_metadata_before_creating_the_value() {
    let started = Arc::new(AtomicUsize::new(0));
    let container = ContainerBuilder::new()
        .add_factory(ServerFactory(started.clone()))
        .build();

    let lazy = container.get_lazy::<Server, Port>().unwrap();
    assert_eq!(lazy.metadata().0, 8080);
    assert!(!lazy.is_value_created());
    assert_eq!(started.load(Ordering::SeqCst), 0);

    assert_eq!(lazy.started.load(Ordering::SeqCst), 1);
    assert!(lazy.is_value_created());
}

#[test]
fn lazy_of_several_exports_is_ambiguous() {
    let container = ContainerBuilder::new()
        .add_instance_with_metadata("a".to_string(), Metadata::from([("Port".to_string(), 1.into())]))
        .add_instance_with_metadata("b".to_string(), Metadata::from([("Port".to_string(), 2.into())]))
        .build();

    let err = container.get_lazy::<String, Port>().unwrap_err();
    assert!(matches!(err, CompositionError::AmbiguousMatch { .. }));
}

struct Parent {
    child: Arc<Child>,
}
struct Child {
    parent: Arc<Lazy<Parent>>,
}
struct ParentFactory;
impl InstanceFactory for ParentFactory {
    type Provides = Parent;

    fn get_imports() -> Vec<ImportInfo> {
        vec![ImportInfo::of::<Child>("child")]
    }

    fn sharing(&self) -> Sharing {
        Sharing::Shared
    }

    fn construct(&self, imports: &Imports) -> Result<Self::Provides, DynError> {
        Ok(Parent {
            child: imports.get("child")?,
        })
    }
}
struct ChildFactory;
impl InstanceFactory for ChildFactory {
    type Provides = Child;

    fn get_imports() -> Vec<ImportInfo> {
        vec![ImportInfo::lazy::<Parent, ()>("parent")]
    }

    fn construct(&self, imports: &Imports) -> Result<Self::Provides, DynError> {
        Ok(Child {
            parent: imports.get("parent")?,
        })
    }
}

#[test]
fn lazy_imports_break_cycles() {
    let container = ContainerBuilder::new()
        .add_factory(ParentFactory)
        .add_factory(ChildFactory)
        .build();

    let parent = container.get_export::<Parent>().unwrap();
    assert!(!parent.child.parent.is_value_created());
    assert!(Arc::ptr_eq(parent.child.parent.get(), &parent));
}

#[test]
fn lazy_imports_break_cycles_entered_from_the_other_side() {
    let container = ContainerBuilder::new()
        .add_factory(ParentFactory)
        .add_factory(ChildFactory)
        .build();

    let child = container.get_export::<Child>().unwrap();
    let parent = child.parent.get();
    assert!(!Arc::ptr_eq(&parent.child, &child));
}

#[derive(Debug)]
struct Left;
struct Right;
struct LeftFactory;
impl InstanceFactory for LeftFactory {
    type Provides = Left;

    fn get_imports() -> Vec<ImportInfo> {
        vec![ImportInfo::of::<Right>("right")]
    }

    fn construct(&self, _imports: &Imports) -> Result<Self::Provides, DynError> {
        Ok(Left)
    }
}
struct RightFactory;
impl InstanceFactory for RightFactory {
    type Provides = Right;

    fn get_imports() -> Vec<ImportInfo> {
        vec![ImportInfo::of::<Left>("left")]
    }

    fn construct(&self, _imports: &Imports) -> Result<Self::Provides, DynError> {
        Ok(Right)
    }
}

#[test]
fn prerequisite_cycles_fail() {
    let container = ContainerBuilder::new()
        .add_factory(LeftFactory)
        .add_factory(RightFactory)
        .build();

    let err = container.get_export::<Left>().unwrap_err();
    let CompositionError::CyclicDependency { chain } = err else {
        panic!("expected a cyclic dependency, got {err:?}");
    };
    assert_eq!(chain, vec!["LeftFactory", "RightFactory", "LeftFactory"]);
}

struct Owner {
    notified: AtomicUsize,
}
struct Owned {
    owner: OnceLock<Arc<Owner>>,
}
struct OwnerFactory;
impl InstanceFactory for OwnerFactory {
    type Provides = Owner;

    fn get_imports() -> Vec<ImportInfo> {
        vec![ImportInfo::of::<Owned>("owned")]
    }

    fn sharing(&self) -> Sharing {
        Sharing::Shared
    }

    fn construct(&self, imports: &Imports) -> Result<Self::Provides, DynError> {
        imports.get::<Owned>("owned")?;
        Ok(Owner {
            notified: AtomicUsize::new(0),
        })
    }

    fn on_imports_satisfied(&self, instance: &Self::Provides) -> Result<(), DynError> {
        instance.notified.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
struct OwnedFactory;
impl InstanceFactory for OwnedFactory {
    type Provides = Owned;

    fn get_imports() -> Vec<ImportInfo> {
        vec![ImportInfo::of::<Owner>("owner").non_prerequisite()]
    }

    fn sharing(&self) -> Sharing {
        Sharing::Shared
    }

    fn construct(&self, _imports: &Imports) -> Result<Self::Provides, DynError> {
        Ok(Owned {
            owner: OnceLock::new(),
        })
    }

    fn satisfy(&self, instance: &Self::Provides, imports: &Imports) -> Result<(), DynError> {
        let _ = instance.owner.set(imports.get("owner")?);
        Ok(())
    }
}

#[test]
fn non_prerequisite_imports_close_cycles_after_construction() {
    let container = ContainerBuilder::new()
        .add_factory(OwnerFactory)
        .add_factory(OwnedFactory)
        .build();

    let owner = container.get_export::<Owner>().unwrap();
    let owned = container.get_export::<Owned>().unwrap();

    let wired = owned.owner.get().expect("owner is wired once the graph is complete");
    assert!(Arc::ptr_eq(wired, &owner));
    assert_eq!(owner.notified.load(Ordering::SeqCst), 1);
}

#[derive(Debug)]
struct Session(usize);
struct SessionFactory(Arc<AtomicUsize>);
impl InstanceFactory for SessionFactory {
    type Provides = Session;

    fn get_imports() -> Vec<ImportInfo> {
        Vec::new()
    }

    fn sharing(&self) -> Sharing {
        Sharing::SharedWithin("request".to_string())
    }

    fn construct(&self, _imports: &Imports) -> Result<Self::Provides, DynError> {
        Ok(Session(self.0.fetch_add(1, Ordering::SeqCst)))
    }
}

#[test]
fn exports_are_shared_within_their_boundary() {
    let container = ContainerBuilder::new()
        .add_factory(SessionFactory(Arc::default()))
        .build();
    let contract = CompositionContract::of::<Session>();

    let first_request = container.new_scope(["request"]);
    let second_request = container.new_scope(["request"]);

    let first = container.get_export_in(&first_request, &contract).unwrap();
    let again = container.get_export_in(&first_request, &contract).unwrap();
    let second = container.get_export_in(&second_request, &contract).unwrap();

    assert!(Arc::ptr_eq(&first.instance, &again.instance));
    assert_eq!(first.downcast::<Session>().unwrap().0, 0);
    assert_eq!(second.downcast::<Session>().unwrap().0, 1);

    let err = container.get_export::<Session>().unwrap_err();
    assert!(matches!(err, CompositionError::SharingBoundaryNotFound { .. }));
}

#[derive(Debug)]
struct Faulty;
struct FaultyFactory;
impl InstanceFactory for FaultyFactory {
    type Provides = Faulty;

    fn get_imports() -> Vec<ImportInfo> {
        Vec::new()
    }

    fn sharing(&self) -> Sharing {
        Sharing::Shared
    }

    fn construct(&self, _imports: &Imports) -> Result<Self::Provides, DynError> {
        Err("connection refused".into())
    }
}

#[test]
fn failed_activations_release_the_sharing_lock() {
    let container = ContainerBuilder::new().add_factory(FaultyFactory).build();

    let err = container.get_export::<Faulty>().unwrap_err();
    assert!(err.to_string().contains("connection refused"));

    let lock = container.root_scope().sharing_lock().clone();
    let locked = std::thread::spawn(move || lock.try_lock().is_none()).join().unwrap();
    assert!(!locked);
}

#[test]
fn shared_exports_are_created_once_across_threads() {
    let constructed = Arc::new(AtomicUsize::new(0));
    let container = ContainerBuilder::new()
        .add_factory(ServerFactory(constructed.clone()))
        .add_factory(SharedServerFactory)
        .build();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let container = container.clone();
            std::thread::spawn(move || container.get_export::<SharedServer>().unwrap())
        })
        .collect();
    let servers: Vec<Arc<SharedServer>> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

    assert_eq!(constructed.load(Ordering::SeqCst), 1);
    assert!(servers.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
}

struct SharedServer(#[allow(dead_code)] Arc<Server>);
struct SharedServerFactory;
impl InstanceFactory for SharedServerFactory {
    type Provides = SharedServer;

    fn get_imports() -> Vec<ImportInfo> {
        vec![ImportInfo::of::<Server>("server")]
    }

    fn sharing(&self) -> Sharing {
        Sharing::Shared
    }

    fn construct(&self, imports: &Imports) -> Result<Self::Provides, DynError> {
        Ok(SharedServer(imports.get("server")?))
    }
}

#[test]
fn many_lazies_collect_every_export() {
    let container = ContainerBuilder::new()
        .add_instance_with_metadata(1_u32, Metadata::from([("Port".to_string(), 80.into())]))
        .add_instance_with_metadata(2_u32, Metadata::from([("Port".to_string(), 443.into())]))
        .build();

    let lazies = container.get_lazy_exports::<u32, Port>().unwrap();
    let ports: Vec<i64> = lazies.iter().map(|lazy| lazy.metadata().0).collect();
    assert_eq!(ports, vec![80, 443]);
    assert!(lazies.iter().all(|lazy| !lazy.is_value_created()));
    assert_eq!(**lazies[1].get(), 2);

    let imported = container
        .get_export_for(&CompositionContract::many::<Vec<Lazy<u32>>>())
        .unwrap()
        .downcast::<Vec<Lazy<u32>>>()
        .unwrap();
    assert_eq!(imported.len(), 2);
}

#[test]
fn many_lazies_behind_arcs_are_rejected() {
    let container = ContainerBuilder::new().add_instance(1_u32).add_instance(2_u32).build();

    let err = container
        .get_export_for(&CompositionContract::many::<Vec<Arc<Lazy<u32>>>>())
        .unwrap_err();
    assert!(matches!(err, CompositionError::UnsupportedContract { .. }));
}

struct Holder {
    target: Arc<Lazy<Target>>,
}
#[derive(Debug)]
struct Target;
struct HolderFactory;
impl InstanceFactory for HolderFactory {
    type Provides = Holder;

    fn get_imports() -> Vec<ImportInfo> {
        vec![ImportInfo::lazy::<Target, ()>("target")]
    }

    fn sharing(&self) -> Sharing {
        Sharing::Shared
    }

    fn construct(&self, imports: &Imports) -> Result<Self::Provides, DynError> {
        Ok(Holder {
            target: imports.get("target")?,
        })
    }
}
struct TargetFactory;
impl InstanceFactory for TargetFactory {
    type Provides = Target;

    fn get_imports() -> Vec<ImportInfo> {
        vec![ImportInfo::of::<Holder>("holder")]
    }

    fn construct(&self, imports: &Imports) -> Result<Self::Provides, DynError> {
        imports.get::<Holder>("holder")?.target.try_get()?;
        Ok(Target)
    }
}

#[test]
fn forcing_a_lazy_from_its_own_creation_fails() {
    let container = ContainerBuilder::new()
        .add_factory(HolderFactory)
        .add_factory(TargetFactory)
        .build();

    let holder = container.get_export::<Holder>().unwrap();
    let err = holder.target.try_get().unwrap_err();

    let CompositionError::ActivationFailed { error, .. } = err else {
        panic!("expected an activation failure, got {err:?}");
    };
    assert!(error.to_string().contains("cyclic dependency"));
    assert!(holder.target.try_get().is_err());
}

struct Connection(Arc<AtomicUsize>);
impl Drop for Connection {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}
struct ConnectionFactory(Arc<AtomicUsize>);
impl InstanceFactory for ConnectionFactory {
    type Provides = Connection;

    fn get_imports() -> Vec<ImportInfo> {
        Vec::new()
    }

    fn sharing(&self) -> Sharing {
        Sharing::SharedWithin("request".to_string())
    }

    fn construct(&self, _imports: &Imports) -> Result<Self::Provides, DynError> {
        Ok(Connection(self.0.clone()))
    }
}

#[test]
fn scoped_exports_release_their_scope_when_dropped() {
    let closed = Arc::new(AtomicUsize::new(0));
    let container = ContainerBuilder::new()
        .add_factory(ConnectionFactory(closed.clone()))
        .build();

    let export = container.get_scoped_export::<Connection, _, _>(["request"]).unwrap();
    let kept = Arc::downgrade(export.value());
    assert_eq!(closed.load(Ordering::SeqCst), 0);

    drop(export);
    assert!(kept.upgrade().is_none());
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}
