//! Attribute macros for agent-relay.
//!
//! `#[tool_args]` marks a struct as the typed argument payload of a function
//! tool; `#[structured_output]` marks a struct as the structured output of an
//! agent. Both attach a JSON schema derivation so the runtime can advertise the
//! shape to the model and validate what comes back.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ItemStruct};

/// Derives `serde::Deserialize` and `schemars::JsonSchema` and rejects
/// unknown fields, so a model that invents arguments gets `InvalidArguments`
/// instead of having them silently dropped.
#[proc_macro_attribute]
pub fn tool_args(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemStruct);
    let vis = &input.vis;
    let ident = &input.ident;
    let generics = &input.generics;
    let fields = &input.fields;
    let attrs = &input.attrs;
    let semi = input.semi_token;

    let expanded = quote! {
        #[derive(::serde::Deserialize, ::schemars::JsonSchema)]
        #[serde(deny_unknown_fields)]
        #(#attrs)*
        #vis struct #ident #generics #fields #semi
    };
    expanded.into()
}

/// Derives `serde::Serialize`, `serde::Deserialize` and `schemars::JsonSchema`
/// for a structured agent output.
#[proc_macro_attribute]
pub fn structured_output(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemStruct);
    let vis = &input.vis;
    let ident = &input.ident;
    let generics = &input.generics;
    let fields = &input.fields;
    let attrs = &input.attrs;
    let semi = input.semi_token;

    let expanded = quote! {
        #[derive(::serde::Serialize, ::serde::Deserialize, ::schemars::JsonSchema)]
        #(#attrs)*
        #vis struct #ident #generics #fields #semi
    };
    expanded.into()
}
