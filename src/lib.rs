#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![no_std]

pub use vc_graph as graph;
pub use vc_ident as ident;
pub use vc_transform as transform;
