include!("schema.rs");
include!("load.rs");
include!("merge.rs");
include!("expand.rs");
