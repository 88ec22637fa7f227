//! Procedural macros for looptest
//!
//! This crate provides the `#[looptest::gen_test]` attribute macro, which
//! turns an `async fn` into a regular `#[test]` that runs on its own event
//! loop under a deadline.
//!
//! # Example
//!
//! ```rust,ignore
//! use looptest::net::HttpClient;
//!
//! #[looptest::gen_test(timeout = 2.5)]
//! async fn test_hello(http_client: HttpClient, base_url: String) {
//!     let response = http_client.get(&base_url).await.unwrap();
//!     assert_eq!(response.status(), 200);
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    parse::{Parse, ParseStream},
    parse_macro_input, Expr, FnArg, Ident, ItemFn, Lit, Pat, Path, Token,
};

/// Options accepted by `#[gen_test(...)]`.
#[derive(Default)]
struct GenTestConfig {
    /// Deadline in seconds, overriding `async_test_timeout`
    timeout_secs: Option<f64>,
    /// `false` selects start/stop execution
    run_sync: Option<bool>,
    /// Function registering extra fixtures on the session
    fixtures: Option<Path>,
}

impl Parse for GenTestConfig {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut config = GenTestConfig::default();

        while !input.is_empty() {
            let ident: Ident = input.parse()?;
            input.parse::<Token![=]>()?;

            match ident.to_string().as_str() {
                "timeout" => {
                    let lit: Lit = input.parse()?;
                    let secs = match &lit {
                        Lit::Float(f) => f.base10_parse::<f64>()?,
                        Lit::Int(i) => i.base10_parse::<u64>()? as f64,
                        _ => {
                            return Err(syn::Error::new_spanned(
                                lit,
                                "timeout must be a number of seconds",
                            ))
                        }
                    };
                    config.timeout_secs = Some(secs);
                }
                "run_sync" => {
                    let lit: Lit = input.parse()?;
                    match lit {
                        Lit::Bool(b) => config.run_sync = Some(b.value()),
                        other => {
                            return Err(syn::Error::new_spanned(other, "run_sync must be a bool"))
                        }
                    }
                }
                "fixtures" => {
                    config.fixtures = Some(input.parse()?);
                }
                _ => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("unknown attribute: {ident}"),
                    ));
                }
            }

            if input.peek(Token![,]) {
                input.parse::<Token![,]>()?;
            }
        }

        Ok(config)
    }
}

/// A parameter of the annotated function, resolved as a fixture unless it
/// carries `#[default(expr)]`.
struct FixtureParam {
    name: Ident,
    ty: syn::Type,
    default: Option<Expr>,
}

fn fixture_params(input: &mut ItemFn) -> syn::Result<Vec<FixtureParam>> {
    let mut params = Vec::new();
    for arg in &mut input.sig.inputs {
        let pat_type = match arg {
            FnArg::Typed(pat_type) => pat_type,
            FnArg::Receiver(receiver) => {
                return Err(syn::Error::new_spanned(
                    receiver,
                    "gen_test functions cannot take self",
                ))
            }
        };
        let Pat::Ident(pat_ident) = &*pat_type.pat else {
            return Err(syn::Error::new_spanned(
                &pat_type.pat,
                "gen_test parameters must be plain identifiers naming fixtures",
            ));
        };

        let mut default = None;
        let mut kept = Vec::with_capacity(pat_type.attrs.len());
        for attr in pat_type.attrs.drain(..) {
            if attr.path().is_ident("default") {
                default = Some(attr.parse_args::<Expr>()?);
            } else {
                kept.push(attr);
            }
        }
        pat_type.attrs = kept;

        params.push(FixtureParam {
            name: pat_ident.ident.clone(),
            ty: (*pat_type.ty).clone(),
            default,
        });
    }
    Ok(params)
}

/// Marks an async test function to run on a dedicated event loop.
///
/// The function's parameters name the fixtures it needs; each is resolved
/// by the session and passed by value. A parameter annotated with
/// `#[default(expr)]` is not resolved and receives `expr` instead.
///
/// The function may return `()` or `Result<(), E>` for any error type `E`
/// convertible to `Box<dyn Error>`. The generated test panics with the
/// failure's message, so `#[should_panic]` works as usual.
///
/// # Configuration Options
///
/// - `timeout = 0.5` - Deadline in seconds (default: `async_test_timeout`)
/// - `run_sync = false` - Start the loop and stop it once the test settles
/// - `fixtures = path::to::fn` - A `fn(&mut Session)` registering fixtures
///
/// ```rust,ignore
/// fn fixtures(session: &mut looptest::session::Session) {
///     session.register("app", |_| Ok(my_app()));
/// }
///
/// #[looptest::gen_test(fixtures = fixtures, run_sync = false)]
/// async fn test_deferred(http_client: HttpClient, base_url: String, #[default(3)] retries: u32) {
///     for _ in 0..retries {
///         http_client.get(&base_url).await.unwrap();
///     }
/// }
/// ```
#[proc_macro_attribute]
pub fn gen_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let config = parse_macro_input!(attr as GenTestConfig);
    let input = parse_macro_input!(item as ItemFn);

    expand_gen_test(config, input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_gen_test(config: GenTestConfig, mut input: ItemFn) -> syn::Result<TokenStream2> {
    if input.sig.asyncness.is_none() {
        return Err(syn::Error::new_spanned(
            &input.sig,
            "gen_test function must be async",
        ));
    }
    if !input.sig.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.sig.generics,
            "gen_test functions cannot be generic",
        ));
    }

    let params = fixture_params(&mut input)?;
    let name = &input.sig.ident;
    let test_name = name.to_string();
    let attrs = &input.attrs;
    let vis = &input.vis;
    let inputs = &input.sig.inputs;
    let output = &input.sig.output;
    let body = &input.block;

    let body_fn = format_ident!("__looptest_body");
    let call_fn = format_ident!("__looptest_call");
    let args = format_ident!("__looptest_args");

    let bindings = params.iter().map(|param| {
        let FixtureParam { name, ty, default } = param;
        match default {
            Some(expr) => quote! { let #name: #ty = #expr; },
            None => {
                let key = name.to_string();
                quote! { let #name: #ty = #args.take::<#ty>(#key)?; }
            }
        }
    });
    let arg_names = params.iter().map(|param| &param.name);
    let signature = params.iter().map(|param| {
        let key = param.name.to_string();
        if param.default.is_some() {
            quote! { ::looptest::signature::Param::defaulted(#key) }
        } else {
            quote! { ::looptest::signature::Param::required(#key) }
        }
    });

    let timeout = config
        .timeout_secs
        .map(|secs| quote! { .timeout_secs(#secs) });
    let run_sync = config
        .run_sync
        .map(|run_sync| quote! { .run_sync(#run_sync) });
    let fixtures = config
        .fixtures
        .map(|path| quote! { #path(&mut __looptest_session); });

    Ok(quote! {
        #[::core::prelude::v1::test]
        #(#attrs)*
        #vis fn #name() {
            async fn #body_fn(#inputs) #output #body

            #[allow(unused_mut)]
            async fn #call_fn(
                mut #args: ::looptest::fixture::Args,
            ) -> ::looptest::item::BodyResult {
                #(#bindings)*
                ::looptest::item::IntoBodyResult::into_body_result(
                    #body_fn(#(#arg_names),*).await,
                )
            }

            let __looptest_item = ::looptest::item::TestItem::native(
                #test_name,
                ::looptest::signature::Signature::function([#(#signature),*]),
                #call_fn,
            )
            .mark(::looptest::marker::GenTest::new() #timeout #run_sync);

            let mut __looptest_session = ::looptest::session::Session::from_env();
            #fixtures
            if let ::core::result::Result::Err(err) = __looptest_session.run(&__looptest_item) {
                ::core::panic!("{}", err);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[::core::prelude::v1::test]
    fn test_config_parse_empty() {
        let config: GenTestConfig = syn::parse_str("").unwrap();
        assert!(config.timeout_secs.is_none());
        assert!(config.run_sync.is_none());
        assert!(config.fixtures.is_none());
    }

    #[::core::prelude::v1::test]
    fn test_config_parse_timeout() {
        let config: GenTestConfig = syn::parse_str("timeout = 0.5").unwrap();
        assert_eq!(config.timeout_secs, Some(0.5));

        let config: GenTestConfig = syn::parse_str("timeout = 3").unwrap();
        assert_eq!(config.timeout_secs, Some(3.0));
    }

    #[::core::prelude::v1::test]
    fn test_config_parse_multiple() {
        let config: GenTestConfig =
            syn::parse_str("timeout = 1.0, run_sync = false, fixtures = support::fixtures").unwrap();
        assert_eq!(config.timeout_secs, Some(1.0));
        assert_eq!(config.run_sync, Some(false));
        let path = config.fixtures.unwrap();
        assert_eq!(quote!(#path).to_string(), "support :: fixtures");
    }

    #[::core::prelude::v1::test]
    fn test_config_rejects_unknown_key() {
        let Err(err) = syn::parse_str::<GenTestConfig>("flavor = \"multi_thread\"") else {
            panic!("unknown key accepted");
        };
        assert!(err.to_string().contains("unknown attribute: flavor"));
    }

    #[::core::prelude::v1::test]
    fn test_defaulted_params_stripped() {
        let mut input: ItemFn = syn::parse_str(
            "async fn test_x(io_loop: EventLoop, #[default(3)] retries: u32) {}",
        )
        .unwrap();
        let params = fixture_params(&mut input).unwrap();

        assert_eq!(params.len(), 2);
        assert_eq!(params[0].name, "io_loop");
        assert!(params[0].default.is_none());
        assert_eq!(params[1].name, "retries");
        assert!(params[1].default.is_some());
        let FnArg::Typed(retries) = &input.sig.inputs[1] else {
            panic!("expected a typed parameter");
        };
        assert!(retries.attrs.is_empty());
    }

    #[::core::prelude::v1::test]
    fn test_expansion_returns_unit() {
        let input: ItemFn = syn::parse_str(
            "#[should_panic] async fn test_x(io_loop: EventLoop) {}",
        )
        .unwrap();
        let expanded = expand_gen_test(GenTestConfig::default(), input)
            .unwrap()
            .to_string();

        assert!(expanded.contains("fn test_x ()"));
        assert!(!expanded.contains("fn test_x () ->"));
        assert!(expanded.contains("# [should_panic]"));
    }

    #[::core::prelude::v1::test]
    fn test_sync_fn_rejected() {
        let input: ItemFn = syn::parse_str("fn test_x() {}").unwrap();
        let err = expand_gen_test(GenTestConfig::default(), input).unwrap_err();
        assert!(err.to_string().contains("must be async"));
    }
}
