pub(crate) mod stream_scope;
