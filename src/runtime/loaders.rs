//! Loader sources injected into bundles that start dynamic imports

/// Loads a list of `[loader, url]` pairs in parallel, once per URL
pub const BUNDLE_LOADER: &str = r#"var loading = {};

module.exports = function loadBundles(bundles) {
  return Promise.all(bundles.map(function (bundle) {
    var loader = bundle[0];
    var url = bundle[1];
    if (!loading[url]) {
      loading[url] = loader(url).catch(function (error) {
        delete loading[url];
        throw error;
      });
    }
    return loading[url];
  }));
};
"#;

/// Resolves bundle URLs against the URL of the running script
pub const BUNDLE_URL: &str = r#"var base = null;

function scriptBase() {
  if (typeof document !== "undefined" && document.currentScript && document.currentScript.src) {
    return document.currentScript.src.replace(/[^/]*$/, "");
  }
  if (typeof location !== "undefined") {
    return location.href.replace(/[^/]*$/, "");
  }
  return "";
}

exports.resolve = function resolve(url) {
  if (/^([a-z][a-z0-9+.-]*:)?\/\//i.test(url) || url.charAt(0) === "/") {
    return url;
  }
  if (base === null) {
    base = scriptBase();
  }
  return base + url;
};
"#;

/// Loads a script bundle with a `<script>` element
pub const JS_LOADER: &str = r#"module.exports = function loadScript(url) {
  return new Promise(function (resolve, reject) {
    var script = document.createElement("script");
    script.async = true;
    script.src = url;
    script.onload = function () {
      script.onload = script.onerror = null;
      resolve();
    };
    script.onerror = function () {
      script.onload = script.onerror = null;
      reject(new Error("Failed to load " + url));
    };
    document.getElementsByTagName("head")[0].appendChild(script);
  });
};
"#;

/// Loads a script bundle inside a worker
pub const JS_WORKER_LOADER: &str = r#"module.exports = function loadScript(url) {
  return new Promise(function (resolve, reject) {
    try {
      importScripts(url);
      resolve();
    } catch (error) {
      reject(error);
    }
  });
};
"#;

/// Loads a stylesheet bundle with a `<link>` element
pub const CSS_LOADER: &str = r#"module.exports = function loadStylesheet(url) {
  return new Promise(function (resolve, reject) {
    var link = document.createElement("link");
    link.rel = "stylesheet";
    link.href = url;
    link.onload = function () {
      link.onload = link.onerror = null;
      resolve();
    };
    link.onerror = function () {
      link.onload = link.onerror = null;
      reject(new Error("Failed to load " + url));
    };
    document.getElementsByTagName("head")[0].appendChild(link);
  });
};
"#;

/// Stylesheets have nothing to load inside a worker
pub const CSS_WORKER_LOADER: &str = r#"module.exports = function loadStylesheet() {
  return Promise.resolve();
};
"#;
